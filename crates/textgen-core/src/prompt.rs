use std::fmt;

use textgen_common::config::SystemContext;

/// Role delimiters of a chat format. The strings must match the special
/// tokens of the model vocabulary exactly, or the tokenizer will split them
/// into plain text and the model never sees role structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatMarkup {
    pub system_open: &'static str,
    pub user_open: &'static str,
    pub assistant_open: &'static str,
    pub end_of_turn: &'static str,
}

impl ChatMarkup {
    pub const LLAMA3: ChatMarkup = ChatMarkup {
        system_open: "<|start_header_id|>system<|end_header_id|>",
        user_open: "<|start_header_id|>user<|end_header_id|>",
        assistant_open: "<|start_header_id|>assistant<|end_header_id|>",
        end_of_turn: "<|eot_id|>",
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt(String);

impl Prompt {
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

pub fn build_prompt(user_message: &str, system: &SystemContext) -> Prompt {
    build_prompt_with(&ChatMarkup::LLAMA3, user_message, system)
}

/// System turn (policy + schema), user turn, then an open assistant header
/// for the model to continue from.
pub fn build_prompt_with(markup: &ChatMarkup, user_message: &str, system: &SystemContext) -> Prompt {
    let parts: [&str; 8] = [
        markup.system_open,
        &system.policy,
        &system.schema,
        markup.end_of_turn,
        markup.user_open,
        user_message,
        markup.end_of_turn,
        markup.assistant_open,
    ];
    let mut text = String::with_capacity(parts.iter().map(|p| p.len()).sum());
    parts.iter().for_each(|p| text.push_str(p));
    Prompt(text)
}
