use std::sync::Arc;

use crate::api_connection::{ApiConnectionError, ChatBackend, ChatMessage};
use crate::config::EVALUATION_TEMPERATURE;

pub const EVALUATION_PROMPT: &str = "You are an evaluating agent tasked with determining whether a provided \
recipe meets the user’s specified dietary needs. This could either be restrictions or requests. Carefully review the recipe, \
including its ingredients and preparation methods, and compare it against the stated dietary needs. \
Respond exclusively with 'Yes' if the recipe fully complies with the needs or 'No' if it does not. \
Provide no further explanations or commentary. Make sure the recipe includess all requested ingredients. \
Common dietary restrictions include: vegetarian (no meat, but may include dairy and eggs), \
vegan (no animal products at all), gluten-free (no wheat, barley, rye, or cross-contaminated products), dairy-free (no milk or milk-based products), \
nut-free (no tree nuts or peanuts), and kosher (must adhere to Jewish dietary laws, such as avoiding pork and shellfish, and separating meat and dairy).";

/// One-shot "Yes"/"No" check of a recipe against dietary criteria. The model
/// output is returned as-is; nothing enforces the two-word vocabulary.
pub struct EvaluationAgent {
    backend: Arc<dyn ChatBackend>,
    model: String,
    temperature: f32,
}

impl EvaluationAgent {
    pub fn new(backend: Arc<dyn ChatBackend>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            backend,
            model: model.into(),
            temperature,
        }
    }

    pub fn with_default_temperature(backend: Arc<dyn ChatBackend>, model: impl Into<String>) -> Self {
        Self::new(backend, model, EVALUATION_TEMPERATURE)
    }

    pub async fn say(&self, recipe: &str, criteria: &str) -> Result<String, ApiConnectionError> {
        let conversation = [
            ChatMessage::new("system", EVALUATION_PROMPT),
            ChatMessage::new(
                "user",
                format!(
                    "The recipe to evaluate is:\n\n{}\nThe criteria to meet is {}",
                    recipe, criteria
                ),
            ),
        ];
        self.backend
            .chat_completion(&conversation, &self.model, self.temperature)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<(Vec<ChatMessage>, String, f32)>>,
    }

    #[async_trait]
    impl ChatBackend for Recording {
        async fn chat_completion(
            &self,
            messages: &[ChatMessage],
            model: &str,
            temperature: f32,
        ) -> Result<String, ApiConnectionError> {
            self.calls
                .lock()
                .unwrap()
                .push((messages.to_vec(), model.to_string(), temperature));
            Ok("No, it contains eggs.".to_string())
        }
    }

    #[tokio::test]
    async fn returns_raw_model_text_from_a_single_call() {
        let backend = Arc::new(Recording::default());
        let agent = EvaluationAgent::with_default_temperature(backend.clone(), "test-model");

        let verdict = agent.say("2 eggs, 1 cup flour", "vegan").await.unwrap();
        assert_eq!(verdict, "No, it contains eggs.");

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (messages, model, temperature) = &calls[0];
        assert_eq!(model, "test-model");
        assert_eq!(*temperature, 0.0);
        assert_eq!(messages[0].role, "system");
        assert_eq!(
            messages[1].content,
            "The recipe to evaluate is:\n\n2 eggs, 1 cup flour\nThe criteria to meet is vegan"
        );
    }
}
