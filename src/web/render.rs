//! Minimal HTML rendering for the operator pages.
//!
//! Full templating is an external concern; these builders produce just
//! enough structure for the data to be inspected and the forms to post.

use crate::registry::ConnectionEntry;
use crate::storage::LogRow;
use chrono::{Local, TimeZone};

/// Escape text for safe embedding in HTML.
#[must_use]
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
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

fn format_unix(timestamp: i64) -> String {
    Local
        .timestamp_opt(timestamp, 0)
        .single()
        .map_or_else(|| timestamp.to_string(), |t| t.format("%m-%d %H:%M:%S").to_string())
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><title>{} - LogCrunch</title>\
         <link rel=\"stylesheet\" href=\"/static/style.css\"></head>\
         <body><h1>LogCrunch</h1>{body}</body></html>",
        escape(title)
    )
}

#[must_use]
pub fn index_page() -> String {
    page(
        "Home",
        "<ul><li><a href=\"/connections\">Connections</a></li>\
         <li><a href=\"/logs\">Recent logs</a></li>\
         <li><a href=\"/query\">Query</a></li></ul>",
    )
}

#[must_use]
pub fn login_page() -> String {
    page(
        "Login",
        "<form id=\"login\" method=\"post\" action=\"/api/auth/login\">\
         <input name=\"username\" placeholder=\"username\">\
         <input name=\"password\" type=\"password\" placeholder=\"password\">\
         <button type=\"submit\">Log in</button></form>",
    )
}

#[must_use]
pub fn password_change_page() -> String {
    page(
        "Password change",
        "<p>A password change is required before continuing.</p>\
         <form id=\"password-change\" method=\"post\" action=\"/api/auth/password\">\
         <input name=\"current_password\" type=\"password\" placeholder=\"current password\">\
         <input name=\"new_password\" type=\"password\" placeholder=\"new password\">\
         <button type=\"submit\">Update</button></form>",
    )
}

#[must_use]
pub fn connections_page(entries: &[ConnectionEntry]) -> String {
    let mut rows = String::new();
    for entry in entries {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td>\
             <td><a href=\"/alias/edit?ip={}\">edit</a></td></tr>",
            entry.remote_addr,
            escape(&entry.hostname),
            escape(&entry.alias),
            format_unix(entry.first_seen),
            format_unix(entry.last_seen),
            entry.remote_addr,
        ));
    }
    page(
        "Connections",
        &format!(
            "<table><tr><th>IP</th><th>Hostname</th><th>Alias</th>\
             <th>First seen</th><th>Last seen</th><th></th></tr>{rows}</table>"
        ),
    )
}

#[must_use]
pub fn alias_edit_page(entry: &ConnectionEntry) -> String {
    page(
        "Edit alias",
        &format!(
            "<form method=\"post\" action=\"/alias\">\
             <input type=\"hidden\" name=\"ip\" value=\"{}\">\
             <input name=\"alias\" maxlength=\"32\" value=\"{}\">\
             <button type=\"submit\">Save</button></form>",
            entry.remote_addr,
            escape(&entry.alias),
        ),
    )
}

fn log_table(rows: &[LogRow]) -> String {
    let mut body = String::new();
    for row in rows {
        let parsed = row.parsed.to_json_text().unwrap_or_default();
        body.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            format_unix(row.timestamp),
            escape(&row.name),
            escape(&row.host),
            escape(&parsed),
            escape(&row.raw),
        ));
    }
    format!(
        "<table><tr><th>Time</th><th>Name</th><th>Host</th>\
         <th>Parsed</th><th>Raw</th></tr>{body}</table>"
    )
}

#[must_use]
pub fn logs_page(rows: &[LogRow]) -> String {
    page("Recent logs", &log_table(rows))
}

#[must_use]
pub fn query_page(rows: &[LogRow], query: Option<&str>) -> String {
    let query = escape(query.unwrap_or_default());
    page(
        "Query",
        &format!(
            "<form method=\"post\" action=\"/query\">\
             <textarea name=\"query\">{query}</textarea>\
             <button type=\"submit\">Run</button></form>{}",
            log_table(rows)
        ),
    )
}
