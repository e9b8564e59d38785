//! Renders `Message`s to stdout: an internal notice or a line of captured
//! command output, each with a configurable, `{name}`/`{timestamp}`-templated
//! prefix and color.
//!
//! Line-oriented, prefix-per-source rendering, built around a `LogRenderer`
//! ancestor that did the same job with `rich`; here it's re-expressed with
//! `colored` for styling.

use chrono::{DateTime, Local};

use colored::{Color, ColoredString, Colorize};

use crate::config::{CommandConfig, RendererConfig};
use crate::fanout::Consumer;
use crate::message::{Message, Verbosity};

/// Renders messages from both fanouts to stdout until told to stop.
pub struct LineRenderer {
    config: RendererConfig,
    messages: Consumer<Message>,
}

impl LineRenderer {
    pub fn new(config: RendererConfig, messages: Consumer<Message>) -> Self {
        Self { config, messages }
    }

    /// The column budget left for a command's own output once its prefix is
    /// printed. Real terminal-width detection is out of scope — this is
    /// `RendererConfig::default_width` minus the rendered prefix length.
    pub fn available_process_width(&self, command: &CommandConfig) -> u16 {
        let prefix = self.render_prefix_template(
            command.prefix.as_deref().unwrap_or(&self.config.prefix),
            &command.name,
        );
        self.config
            .default_width
            .saturating_sub(prefix.chars().count() as u16)
    }

    /// Consume queued messages and print them. When `drain` is true, returns
    /// once the queue is empty instead of waiting for more; used during
    /// shutdown so output keeps flowing while the supervisor is stopping.
    pub async fn run(&mut self, drain: bool) {
        loop {
            if drain && self.messages.is_empty() {
                return;
            }
            match self.messages.recv().await {
                Some(message) => self.render(&message),
                None => return,
            }
        }
    }

    fn render(&self, message: &Message) {
        match message {
            Message::Internal {
                text,
                verbosity,
                timestamp,
            } => {
                if !self.config.verbose && *verbosity == Verbosity::Debug {
                    return;
                }
                let prefix = self.render_prefix_template(&self.config.internal_prefix, "brood");
                let prefix = style(&prefix, &self.config.internal_prefix_style);
                let body = style(text, &self.config.internal_message_style);
                println!("{prefix}{body}", prefix = prefix, body = body);
                let _ = timestamp;
            }
            Message::Command {
                text,
                command_config,
                ..
            } => {
                let template = command_config
                    .prefix
                    .as_deref()
                    .unwrap_or(&self.config.prefix);
                let prefix = self.render_prefix_template(template, &command_config.name);
                let prefix_style = command_config
                    .prefix_style
                    .as_deref()
                    .unwrap_or(&self.config.prefix_style);
                let prefix = style(&prefix, prefix_style);
                let body = style(text, &self.config.message_style);
                println!("{prefix}{body}", prefix = prefix, body = body);
            }
        }
    }

    fn render_prefix_template(&self, template: &str, name: &str) -> String {
        let now: DateTime<Local> = Local::now();
        template
            .replace("{name}", name)
            .replace("{timestamp}", &now.format("%H:%M:%S").to_string())
    }
}

/// Apply a small set of named styles, space-separated (e.g. `"dim bold"`),
/// ignoring anything unrecognized rather than failing — a renderer should
/// never crash on a typo'd config string.
fn style(text: &str, spec: &str) -> ColoredString {
    let mut out: ColoredString = text.normal();
    for token in spec.split_whitespace() {
        out = match token {
            "dim" | "dimmed" => out.dimmed(),
            "bold" => out.bold(),
            "italic" => out.italic(),
            "underline" => out.underline(),
            "red" => out.color(Color::Red),
            "green" => out.color(Color::Green),
            "yellow" => out.color(Color::Yellow),
            "blue" => out.color(Color::Blue),
            "magenta" => out.color(Color::Magenta),
            "cyan" => out.color(Color::Cyan),
            "white" => out.color(Color::White),
            _ => out,
        };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::Fanout;

    fn command_config(name: &str, prefix: Option<&str>) -> CommandConfig {
        let prefix_field = prefix.map_or(String::new(), |p| format!(r#", "prefix": "{p}""#));
        let json = format!(
            r#"{{"name": "{name}", "command": "x", "starter": {{"type": "once"}}{prefix_field}}}"#
        );
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn prefix_template_substitutes_name() {
        let renderer = LineRenderer::new(RendererConfig::default(), Fanout::new().consumer());
        let rendered = renderer.render_prefix_template("[{name}] ", "web");
        assert_eq!(rendered, "[web] ");
    }

    #[test]
    fn available_width_subtracts_prefix_length() {
        let mut config = RendererConfig::default();
        config.default_width = 80;
        config.prefix = "[{name}] ".to_string();
        let renderer = LineRenderer::new(config, Fanout::new().consumer());

        let width = renderer.available_process_width(&command_config("web", None));
        assert_eq!(width, 80 - "[web] ".chars().count() as u16);
    }

    #[test]
    fn command_specific_prefix_overrides_default() {
        let renderer = LineRenderer::new(RendererConfig::default(), Fanout::new().consumer());
        let width_default = renderer.available_process_width(&command_config("web", None));
        let width_custom = renderer.available_process_width(&command_config("web", Some(">> ")));
        assert_ne!(width_default, width_custom);
    }

    #[tokio::test]
    async fn drain_returns_once_queue_is_empty() {
        let messages: Fanout<Message> = Fanout::new();
        let mut renderer = LineRenderer::new(RendererConfig::default(), messages.consumer());
        messages.put(Message::internal("hello", Verbosity::Info));
        renderer.run(true).await;
    }

    #[test]
    fn unknown_style_tokens_are_ignored_rather_than_panicking() {
        let _ = style("text", "not-a-real-style");
    }
}
