//! Template rendering for system instructions.
//!
//! The default templates ship embedded in the binary; callers may also pass
//! raw template text. Rendered once at the start of a reply and never
//! mutated mid-conversation.

use serde::Serialize;
use tera::{Context, Error as TeraError, Tera};

/// Render a raw tera template with the given context.
pub fn render_template<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    tera.render("inline_template", &context)
}

/// Render one of the embedded templates by name.
pub fn render_builtin<T: Serialize>(name: &str, context_data: &T) -> Result<String, TeraError> {
    let template = builtin(name)
        .ok_or_else(|| TeraError::msg(format!("no builtin template named '{}'", name)))?;
    render_template(template, context_data)
}

fn builtin(name: &str) -> Option<&'static str> {
    match name {
        "system.md" => Some(include_str!("prompts/system.md")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tool::Tool;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_render_template() {
        let template = "Hello, {{ name }}!";
        let mut context = HashMap::new();
        context.insert("name".to_string(), "Alice".to_string());

        let result = render_template(template, &context).unwrap();
        assert_eq!(result, "Hello, Alice!");
    }

    #[test]
    fn test_render_template_missing_variable() {
        let template = "Hello, {{ name }}!";
        let context: HashMap<String, String> = HashMap::new();
        assert!(render_template(template, &context).is_err());
    }

    #[test]
    fn test_render_builtin_system() {
        #[derive(Serialize)]
        struct PromptContext {
            tools: Vec<Tool>,
            sources: Vec<serde_json::Value>,
        }

        let context = PromptContext {
            tools: vec![Tool::new(
                "fetch_weather",
                "Current weather for a city",
                json!({"type": "object"}),
            )],
            sources: vec![json!({
                "name": "weather",
                "description": "remote tool provider",
                "instructions": ""
            })],
        };

        let rendered = render_builtin("system.md", &context).unwrap();
        assert!(rendered.contains("fetch_weather: Current weather for a city"));
        assert!(rendered.contains("weather: remote tool provider"));
    }

    #[test]
    fn test_render_builtin_unknown_name() {
        let context: HashMap<String, String> = HashMap::new();
        assert!(render_builtin("missing.md", &context).is_err());
    }
}
