//! Tool schemas and the per-client tool registry.

use serde_json::{Value, json};

use crate::core::realtime::openai::{ClientEvent, SessionConfig, ToolDef};

/// Instructions used for the follow-up response when a tool has no template.
pub const DEFAULT_FOLLOW_UP: &str =
    "Ask the user a natural, open-ended follow-up question about what was just shown. \
     Keep the conversation natural.";

/// A function the remote model may call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSchema {
    /// Function name
    pub name: String,
    /// When the model should call it
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
    /// Follow-up instructions with `{argument}` placeholders
    pub follow_up: Option<String>,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            follow_up: None,
        }
    }

    pub fn with_follow_up(mut self, template: impl Into<String>) -> Self {
        self.follow_up = Some(template.into());
        self
    }

    /// Wire form used in `session.update`.
    pub fn to_tool_def(&self) -> ToolDef {
        ToolDef {
            tool_type: "function".to_string(),
            name: self.name.clone(),
            description: Some(self.description.clone()),
            parameters: Some(self.parameters.clone()),
        }
    }

    /// Follow-up instructions for one invocation.
    ///
    /// Placeholders naming a missing argument are left as written.
    pub fn follow_up_instructions(&self, arguments: &Value) -> String {
        match &self.follow_up {
            Some(template) => render_template(template, arguments),
            None => DEFAULT_FOLLOW_UP.to_string(),
        }
    }

    /// The weather card tool.
    pub fn display_weather() -> Self {
        Self::new(
            "display_weather",
            "Call this function when a user asks for weather information about any location.",
            json!({
                "type": "object",
                "strict": true,
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "Name of the city or location"
                    },
                    "temperature": {
                        "type": "number",
                        "description": "Current temperature in Celsius"
                    },
                    "condition": {
                        "type": "string",
                        "description": "Weather condition (e.g., 'Sunny', 'Rainy', 'Cloudy')"
                    },
                    "humidity": {
                        "type": "number",
                        "description": "Humidity percentage"
                    },
                    "windSpeed": {
                        "type": "number",
                        "description": "Wind speed in km/h"
                    }
                },
                "required": ["location", "temperature", "condition", "humidity", "windSpeed"]
            }),
        )
        .with_follow_up(
            "Ask if they would like to know some fun facts about {location}. \
             Keep the conversation natural.",
        )
    }
}

fn render_template(template: &str, arguments: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let key = &after[..close];
        match arguments.get(key) {
            Some(Value::String(s)) => out.push_str(s),
            Some(Value::Null) | None => out.push_str(&rest[open..open + close + 2]),
            Some(other) => out.push_str(&other.to_string()),
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

/// Tools registered for every session of one client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolRegistry {
    tools: Vec<ToolSchema>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<ToolSchema>) -> Self {
        Self { tools }
    }

    /// Registry holding the weather tool.
    pub fn with_defaults() -> Self {
        Self::new(vec![ToolSchema::display_weather()])
    }

    pub fn get(&self, name: &str) -> Option<&ToolSchema> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// `session.update` registering every tool with automatic tool choice.
    pub fn session_update(&self) -> ClientEvent {
        ClientEvent::SessionUpdate {
            session: SessionConfig {
                tools: Some(self.tools.iter().map(ToolSchema::to_tool_def).collect()),
                tool_choice: Some("auto".to_string()),
                ..Default::default()
            },
        }
    }
}
