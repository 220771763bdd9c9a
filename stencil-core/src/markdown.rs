use std::sync::LazyLock;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd, html};
use syntect::highlighting::ThemeSet;
use syntect::html::highlighted_html_for_string;
use syntect::parsing::SyntaxSet;

// Initialize syntax highlighting resources once
static SYNTAX_SET: LazyLock<SyntaxSet> = LazyLock::new(SyntaxSet::load_defaults_newlines);
static THEME_SET: LazyLock<ThemeSet> = LazyLock::new(ThemeSet::load_defaults);

const SYNTAX_THEME: &str = "base16-ocean.dark";

/// Render a markdown body to HTML, replacing fenced code blocks with
/// syntax-highlighted markup.
pub fn render_markdown(body: &str) -> String {
    let options = Options::all();
    let parser = Parser::new_ext(body, options);

    let events: Vec<Event> = parser.collect();
    let mut processed_events = Vec::new();
    let mut i = 0;

    while i < events.len() {
        match &events[i] {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(lang))) => {
                // Collect all text events until the end of the code block
                let mut code_content = String::new();
                i += 1;

                while i < events.len() {
                    match &events[i] {
                        Event::End(TagEnd::CodeBlock) => break,
                        Event::Text(text) => code_content.push_str(text),
                        _ => {}
                    }
                    i += 1;
                }

                processed_events.push(Event::Html(highlight_code(lang, &code_content).into()));
            }
            _ => {
                processed_events.push(events[i].clone());
            }
        }
        i += 1;
    }

    let mut out = String::new();
    html::push_html(&mut out, processed_events.into_iter());

    out
}

fn highlight_code(lang: &str, code: &str) -> String {
    let syntax = SYNTAX_SET.find_syntax_by_token(lang).or_else(|| {
        // Fallback mappings for unsupported languages
        match lang {
            "toml" => SYNTAX_SET.find_syntax_by_name("YAML"),
            _ => None,
        }
    });

    match syntax {
        Some(syntax) => {
            let theme = &THEME_SET.themes[SYNTAX_THEME];
            highlighted_html_for_string(code, &SYNTAX_SET, syntax, theme).unwrap_or_else(|_| {
                format!("<pre><code>{}</code></pre>", html_escape::encode_text(code))
            })
        }
        None => format!("<pre><code>{}</code></pre>", html_escape::encode_text(code)),
    }
}

/// Text of the first heading, used as the page title when front matter
/// doesn't set one.
pub fn first_heading(body: &str) -> Option<String> {
    let parser = Parser::new_ext(body, Options::all());

    let mut in_heading = false;
    let mut text_buf = String::new();
    for event in parser {
        match event {
            Event::Start(Tag::Heading { .. }) => in_heading = true,
            Event::End(TagEnd::Heading { .. }) => {
                if in_heading {
                    return Some(text_buf);
                }
            }
            Event::Text(text) => {
                if in_heading {
                    text_buf.push_str(&text)
                }
            }
            _ => continue,
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_basic_markdown() {
        let html = render_markdown("# Title\n\nSome *emphasis*.\n");
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<em>emphasis</em>"));
    }

    #[test]
    fn fenced_code_is_highlighted() {
        let html = render_markdown("```rust\nfn main() {}\n```\n");
        // syntect emits inline-styled spans instead of a bare code block
        assert!(html.contains("<pre"));
        assert!(html.contains("style"));
    }

    #[test]
    fn unknown_language_falls_back_to_escaped_pre() {
        let html = render_markdown("```nosuchlang\na < b\n```\n");
        assert!(html.contains("<pre><code>"));
        assert!(html.contains("a &lt; b"));
    }

    #[test]
    fn first_heading_finds_title() {
        assert_eq!(first_heading("# Hello\n\nbody").as_deref(), Some("Hello"));
        assert_eq!(first_heading("no headings here"), None);
    }
}
