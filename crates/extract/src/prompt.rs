use ingest::DatasetFormat;

use crate::llm::ChatMessage;

pub fn build_extraction_prompt(format: DatasetFormat, review_text: &str) -> String {
    match format {
        DatasetFormat::Space => format!(
            r#"Your task is to extract entities explicitly reviewed (noun), their aspects (just one in: Rooms, Location, Service, Cleanliness, Building, Food, General), and expression phrases (positive or negative adjective) respectively in the following ### Review.
Please follow template:
#Aspect name: #Entity name: #Expression phrases: #Description:
For example:
#Aspect name: Service #Entity name: Staff #Expression phrases: kind, friendly #Description: The staff was kind and friendly.
### Review: {}"#,
            review_text
        ),
        DatasetFormat::Amasum => format!(
            r#"Your task is to extract entities explicitly reviewed (noun), their aspects, and expression phrases (positive or negative adjective) respectively in the following ### Review.
Please follow template:
#Aspect name: #Entity name: #Opinion phrases: #Description:
For example:
#Aspect name: Material, Durability #Entity name: Boots #Opinion phrases: excellent, durable #Description: My boots are made of excellent leather and very durable.
### Review: {}"#,
            review_text
        ),
    }
}

pub fn build_extraction_messages(format: DatasetFormat, review_text: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::user(build_extraction_prompt(format, review_text))]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_uses_dataset_template() {
        let space = build_extraction_prompt(DatasetFormat::Space, "Nice hotel.");
        let amasum = build_extraction_prompt(DatasetFormat::Amasum, "Nice boots.");

        assert!(space.contains("#Expression phrases:"));
        assert!(space.ends_with("### Review: Nice hotel."));
        assert!(amasum.contains("#Opinion phrases:"));
        assert!(!amasum.contains("#Expression phrases:"));
    }
}
