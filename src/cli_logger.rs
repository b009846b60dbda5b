use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use stackpile::{FoldSummary, PutReport};

pub struct CliLogger {
    json: bool,
    no_color: bool,
}

impl CliLogger {
    pub fn new(json: bool, no_color: bool) -> Self {
        Self { json, no_color }
    }

    pub fn print_serialized<T: Serialize>(&self, value: &T) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(value)?);
            return Ok(());
        }

        let rendered = render_value(&serde_json::to_value(value)?, 0);
        println!("{rendered}");
        Ok(())
    }

    pub fn print_put_report(&self, report: &PutReport) -> Result<()> {
        if self.json {
            return self.print_serialized(report);
        }

        let mut out = String::new();
        out.push_str(&format!(
            "{} {} {}\n",
            self.style("stackpile", "36;1"),
            self.style("push", "37;1"),
            self.style("OK", "32;1")
        ));
        out.push_str(&format!("{} {}\n", self.style("key", "90"), report.label_key));
        out.push_str(&format!(
            "{} {} .. {}\n",
            self.style("range", "90"),
            report.from,
            report.until
        ));
        out.push_str(&format!(
            "{} {}{}\n",
            self.style("bucket", "90"),
            report.bucket_start,
            if report.new_bucket { " (new)" } else { "" }
        ));
        out.push_str(&format!(
            "{} samples={} nodes={} merge={}us",
            self.style("stored", "90"),
            report.samples,
            report.nodes,
            report.merge_micros
        ));
        println!("{out}");
        Ok(())
    }

    /// Collapsed-stack text in plain mode, the full summary in JSON mode.
    pub fn print_fold(&self, summary: &FoldSummary) -> Result<()> {
        if self.json {
            return self.print_serialized(summary);
        }

        for row in &summary.stacks {
            println!("{} {}", row.stack, row.weight);
        }
        eprintln!(
            "{} {} pairs={} samples={} nodes={}",
            self.style("folded", "90"),
            summary.path,
            summary.pairs,
            summary.samples,
            summary.nodes
        );
        Ok(())
    }

    pub fn print_error(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "error",
                "code": "error",
                "message": msg,
            });
            println!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("error", "31;1"));
    }

    fn style(&self, text: &str, ansi: &str) -> String {
        if self.no_color {
            return text.to_string();
        }
        format!("\x1b[{ansi}m{text}\x1b[0m")
    }
}

fn render_value(value: &Value, indent: usize) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Number(v) => v.to_string(),
        Value::String(v) => v.clone(),
        Value::Array(items) => render_array(items, indent),
        Value::Object(map) => render_object(map, indent),
    }
}

fn render_array(items: &[Value], indent: usize) -> String {
    if items.is_empty() {
        return "[]".to_string();
    }

    let pad = " ".repeat(indent);
    let mut out = String::new();
    for item in items {
        match item {
            Value::Object(_) | Value::Array(_) => {
                out.push_str(&format!("{pad}-\n{}\n", render_value(item, indent + 2)));
            }
            _ => out.push_str(&format!("{pad}- {}\n", render_value(item, indent + 2))),
        }
    }
    out.trim_end().to_string()
}

fn render_object(map: &serde_json::Map<String, Value>, indent: usize) -> String {
    if map.is_empty() {
        return "{}".to_string();
    }

    let pad = " ".repeat(indent);
    let mut out = String::new();
    for (key, value) in map {
        match value {
            Value::Object(_) | Value::Array(_) => {
                out.push_str(&format!(
                    "{pad}{key}:\n{}\n",
                    render_value(value, indent + 2)
                ));
            }
            _ => out.push_str(&format!(
                "{pad}{key}: {}\n",
                render_value(value, indent + 2)
            )),
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_nested_values_as_indented_text() {
        let value = serde_json::json!({
            "listen_addr": "127.0.0.1:4040",
            "labels": ["env", "host"],
            "limits": {"max_body_bytes": 1024},
        });
        let out = render_value(&value, 0);
        assert!(out.contains("listen_addr: 127.0.0.1:4040"));
        assert!(out.contains("labels:\n  - env\n  - host"));
        assert!(out.contains("limits:\n  max_body_bytes: 1024"));
    }
}
