//! Reminder email content.

use crate::models::Task;

/// Subject plus plain-text and HTML bodies for one reminder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderContent {
    pub subject: String,
    pub text: String,
    pub html: String,
}

pub fn format_due(task: &Task) -> String {
    task.due_at.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

impl ReminderContent {
    pub fn for_task(task: &Task) -> Self {
        let due = format_due(task);
        let description = task
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty());

        let mut text = format!("MindFlow task reminder\n\nTask: {}\n", task.title);
        if let Some(d) = description {
            text.push_str(&format!("Details: {d}\n"));
        }
        text.push_str(&format!(
            "Due: {due}\n\nPlease complete your task in time.\n\n\
             This message was sent automatically by MindFlow; please do not reply.\n"
        ));

        let description_html = description
            .map(|d| format!("<p class=\"task-description\">{}</p>", escape_html(d)))
            .unwrap_or_default();
        let html = format!(
            "<html><body>\
             <h2>MindFlow task reminder</h2>\
             <p class=\"task-title\"><strong>{}</strong></p>\
             {description_html}\
             <p>Due: <span class=\"due-date\">{due}</span></p>\
             <p>Please complete your task in time.</p>\
             <p class=\"footer\">This message was sent automatically by MindFlow; please do not reply.</p>\
             </body></html>",
            escape_html(&task.title)
        );

        Self {
            subject: format!("Task reminder: {}", task.title),
            text,
            html,
        }
    }
}
