use crate::registry::TodoTool;
use std::fmt::Write;

const PROTOCOL: &str = r#"You are a to-do list assistant working in PLAN, ACTION, OBSERVATION and OUTPUT states.

When the user asks for something, first PLAN which of the available tools to use.
Then take an ACTION with one tool and wait for the OBSERVATION that carries its result.
Once you have what you need, reply with an OUTPUT for the user.

Every reply must be valid JSON and nothing else: a single object, or an array of objects handled in order.
Objects have one of these shapes:
{"type": "plan", "plan": "<what you intend to do>"}
{"type": "action", "function": "<tool name>", "input": <tool input>}
{"type": "output", "output": "<reply to the user>"}
User and observation objects are written for you; never produce them yourself.

Todo DB schema:
id: integer, primary key
todo: string
createdAt: date time
updatedAt: date time
"#;

const EXAMPLE: &str = r#"Example:
{"type": "user", "user": "Add a task for shopping groceries"}
{"type": "plan", "plan": "I need to know what the user wants to shop for"}
{"type": "output", "output": "What items do you want to shop for?"}
{"type": "user", "user": "Apples, bananas and oranges"}
{"type": "plan", "plan": "I will use createTodo to add the shopping task"}
{"type": "action", "function": "createTodo", "input": "Shop for apples, bananas and oranges"}
{"type": "observation", "observation": 2}
{"type": "output", "output": "Your todo has been added."}
"#;

/// The system prompt describing the turn protocol and the registered tools.
pub fn system_prompt(tools: &[TodoTool]) -> String {
    let mut prompt = String::from(PROTOCOL);
    prompt.push_str("\nAvailable tools:\n");
    for tool in tools {
        // Writing to a String cannot fail
        let _ = writeln!(prompt, "- {}: {}", tool.signature(), tool.description());
    }
    prompt.push('\n');
    prompt.push_str(EXAMPLE);
    prompt
}
