//! Prompt and transcript construction.

use chrono::{DateTime, Datelike, Local, TimeZone};

use super::message::{ConversationTurn, Message};

/// System instruction for the tool-deciding call.
///
/// Frames the model as a dispatcher that answers directly unless a tool is
/// genuinely needed.
pub fn dispatcher_prompt<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let weekday = match now.weekday() {
        chrono::Weekday::Mon => "Monday",
        chrono::Weekday::Tue => "Tuesday",
        chrono::Weekday::Wed => "Wednesday",
        chrono::Weekday::Thu => "Thursday",
        chrono::Weekday::Fri => "Friday",
        chrono::Weekday::Sat => "Saturday",
        chrono::Weekday::Sun => "Sunday",
    };

    format!(
        "Today is {} ({}). You are a helpful, harmless and honest assistant acting as a tool dispatcher.\n\
         - Default to answering directly. Call a tool only when you genuinely need information or an action you cannot provide yourself.\n\
         - Do not call tools for pure reasoning, common knowledge or summarising.\n\
         - Never call a tool just to try something out or to verify an answer; if information is missing, answer without tools.\n\
         - Do not call tools excessively unless the user explicitly asks for it.\n\
         - When you do call a tool, pick the one that fits, pass valid JSON arguments, and do not write an answer in the same reply.\n\
         - When you answer directly, be concise and helpful, in the user's language.",
        now.format("%Y-%m-%d"),
        weekday
    )
}

/// Prior turns in chronological order, then the new user input.
pub fn build_transcript(history: &[ConversationTurn], user_input: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 1);
    for turn in history {
        messages.push(Message::user(&turn.user_input));
        if let Some(answer) = turn.ai_response.as_deref().filter(|a| !a.is_empty()) {
            messages.push(Message::assistant(answer));
        }
    }
    messages.push(Message::user(user_input));
    messages
}

/// Messages for a deciding call: the dispatcher prompt, then the transcript.
pub fn decision_messages(transcript: &[Message]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(transcript.len() + 1);
    messages.push(Message::system(dispatcher_prompt(&Local::now())));
    messages.extend_from_slice(transcript);
    messages
}
