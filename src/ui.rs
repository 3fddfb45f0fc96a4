use std::io::Write;

use colored::*;
use terminal_size::{terminal_size, Height, Width};

use crate::agent::events::StreamEvent;
use crate::agent::profiles::VisibleProfile;
use crate::tools::ToolCatalog;

pub fn print_header(model: &str, session_id: &str) {
    let (width, _) = terminal_size().unwrap_or((Width(80), Height(24)));
    let line = "─".repeat(width.0 as usize);
    println!("{}", line.black().bold());

    let name = "toolrelay".cyan().bold();
    let version = format!("v{}", env!("CARGO_PKG_VERSION")).black().bold();
    println!("  {} {}", name, version);

    let info = format!("  {}  •  session {}", model, session_id).cyan();
    println!("{}", info);

    println!("{}", line.black().bold());
}

pub fn print_step(msg: &str) {
    println!("  {} {}", "•".green(), msg);
}

pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green().bold(), msg.green());
}

pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠️ ".yellow().bold(), msg.yellow());
}

pub fn print_error(msg: &str) {
    println!("  {} {}", "❌".red().bold(), msg.red());
}

pub fn print_thinking(msg: &str) {
    println!("  {} {}...", "∴".magenta(), msg);
}

/// Render one stream event. Answer chunks are written inline without a
/// trailing newline.
pub fn print_event(event: &StreamEvent) {
    match event {
        StreamEvent::Status { content } => print_thinking(content.trim_end_matches('.')),
        StreamEvent::ToolPlan { content, .. } => print_step(content),
        StreamEvent::ToolStart {
            tool_name,
            tool_args,
            progress,
            ..
        } => print_step(&format!(
            "[{}] {} {}",
            progress,
            tool_name.cyan(),
            tool_args.to_string().black().bold()
        )),
        StreamEvent::ToolEnd {
            tool_name, result, ..
        } => print_success(&format!("{} → {}", tool_name, truncate(result, 80))),
        StreamEvent::ToolError {
            tool_name, error, ..
        } => print_warning(&format!("{}: {}", tool_name, error)),
        StreamEvent::AiResponseStart { .. } => println!(),
        StreamEvent::AiResponseChunk { content } => {
            print!("{}", content);
            let _ = std::io::stdout().flush();
        }
        StreamEvent::AiResponseEnd { .. } => println!("\n"),
        StreamEvent::Error { content } => print_error(content),
    }
}

pub fn print_models(models: &[VisibleProfile]) {
    for model in models {
        let marker = if model.is_default { "*".green().bold() } else { " ".normal() };
        println!(
            "  {} {:<16} {:<24} {}",
            marker,
            model.id.cyan(),
            model.label,
            model.model_name.black().bold()
        );
    }
}

pub fn print_catalog(catalog: &ToolCatalog) {
    for server in &catalog.servers {
        println!("  {} ({} tools)", server.name.yellow().bold(), server.tool_count);
        for tool in &server.tools {
            println!("    {} {}", tool.name.cyan(), truncate(&tool.description, 60));
        }
    }
    println!(
        "  {} tools across {} servers",
        catalog.total_tools, catalog.server_count
    );
}

fn truncate(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let head: String = flat.chars().take(max_chars).collect();
    format!("{head}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_flattens_and_shortens() {
        assert_eq!(truncate("a\nb", 10), "a b");
        assert_eq!(truncate("abcdef", 3), "abc…");
    }
}
