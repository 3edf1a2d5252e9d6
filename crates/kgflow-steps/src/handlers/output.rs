//! Output steps: render markdown, then convert it to the requested format.

use super::{required_text, template_source};
use crate::env::StepEnv;
use crate::error::HandlerError;
use crate::registry::{Inputs, StepHandler};
use kgflow_workflow::{Step, StepKind};
use pulldown_cmark::{html, CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use serde_json::{json, Value};
use std::path::Path;
use tracing::debug;

const PAGE_BREAKS: [&str; 2] = ["\\pagebreak", "<!-- pagebreak -->"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Markdown,
    Html,
    Latex,
    DocxHtml,
    PptxHtml,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::Latex => "latex",
            Self::DocxHtml => "docx-html",
            Self::PptxHtml => "pptx-html",
        }
    }

    /// `auto` picks by the output file's extension.
    pub fn resolve(name: &str, output_path: &Path) -> Result<Self, HandlerError> {
        match name.to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "html" => Ok(Self::Html),
            "latex" | "tex" => Ok(Self::Latex),
            "docx-html" => Ok(Self::DocxHtml),
            "pptx-html" => Ok(Self::PptxHtml),
            "auto" => {
                let ext = output_path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();
                Ok(match ext.as_str() {
                    "html" | "htm" => Self::Html,
                    "tex" => Self::Latex,
                    _ => Self::Markdown,
                })
            }
            "xlsx" => Err(HandlerError::output("xlsx output is not supported")),
            other => Err(HandlerError::output(format!("unknown output format {other:?}"))),
        }
    }
}

fn options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options
}

fn is_page_break(line: &str) -> bool {
    PAGE_BREAKS.contains(&line.trim())
}

pub fn markdown_to_html(markdown: &str) -> String {
    let mut out = String::new();
    html::push_html(&mut out, Parser::new_ext(markdown, options()));
    out
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn html_document(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n{}</body>\n</html>\n",
        escape_html(title),
        body
    )
}

fn docx_html(title: &str, markdown: &str) -> String {
    let mut body = String::new();
    for (i, page) in split_pages(markdown).iter().enumerate() {
        if i > 0 {
            body.push_str("<br clear=\"all\" style=\"page-break-before:always\">\n");
        }
        body.push_str(&markdown_to_html(page));
    }
    format!(
        "<html xmlns:o=\"urn:schemas-microsoft-com:office:office\" xmlns:w=\"urn:schemas-microsoft-com:office:word\" xmlns=\"http://www.w3.org/TR/REC-html40\">\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<!--[if gte mso 9]><xml><w:WordDocument><w:View>Print</w:View></w:WordDocument></xml><![endif]-->\n</head>\n<body>\n{}</body>\n</html>\n",
        escape_html(title),
        body
    )
}

fn split_pages(markdown: &str) -> Vec<String> {
    let mut pages = vec![String::new()];
    for line in markdown.lines() {
        if is_page_break(line) {
            pages.push(String::new());
        } else if let Some(page) = pages.last_mut() {
            page.push_str(line);
            page.push('\n');
        }
    }
    pages
}

/// Slides are separated by `---` lines.
fn split_slides(markdown: &str) -> Vec<String> {
    let mut slides = vec![String::new()];
    for line in markdown.lines() {
        if line.trim() == "---" || is_page_break(line) {
            slides.push(String::new());
        } else if let Some(slide) = slides.last_mut() {
            slide.push_str(line);
            slide.push('\n');
        }
    }
    slides.retain(|s| !s.trim().is_empty());
    if slides.is_empty() {
        slides.push(String::new());
    }
    slides
}

fn pptx_html(title: &str, slides: &[String]) -> String {
    let mut body = String::new();
    for (i, slide) in slides.iter().enumerate() {
        body.push_str(&format!("<section class=\"slide\" data-slide=\"{}\">\n", i + 1));
        body.push_str(&markdown_to_html(slide));
        body.push_str("</section>\n");
    }
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>.slide{{page-break-after:always;min-height:100vh}}</style>\n</head>\n<body>\n{}</body>\n</html>\n",
        escape_html(title),
        body
    )
}

fn escape_latex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\textbackslash{}"),
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            '~' => out.push_str("\\textasciitilde{}"),
            '^' => out.push_str("\\textasciicircum{}"),
            _ => out.push(c),
        }
    }
    out
}

pub fn markdown_to_latex(markdown: &str) -> String {
    let body = split_pages(markdown).iter().map(|page| latex_events(page)).collect::<Vec<_>>().join("\\newpage\n\n");
    format!(
        "\\documentclass{{article}}\n\\usepackage{{hyperref}}\n\\usepackage[normalem]{{ulem}}\n\\begin{{document}}\n\n{body}\\end{{document}}\n"
    )
}

fn latex_events(markdown: &str) -> String {
    let mut out = String::new();
    let mut in_code = false;
    for event in Parser::new_ext(markdown, options()) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => out.push_str(match level {
                HeadingLevel::H1 => "\\section{",
                HeadingLevel::H2 => "\\subsection{",
                _ => "\\subsubsection{",
            }),
            Event::End(TagEnd::Heading(_)) => out.push_str("}\n\n"),
            Event::Start(Tag::Paragraph) => {}
            Event::End(TagEnd::Paragraph) => out.push_str("\n\n"),
            Event::Start(Tag::Emphasis) => out.push_str("\\emph{"),
            Event::Start(Tag::Strong) => out.push_str("\\textbf{"),
            Event::Start(Tag::Strikethrough) => out.push_str("\\sout{"),
            Event::End(TagEnd::Emphasis | TagEnd::Strong | TagEnd::Strikethrough) => out.push('}'),
            Event::Start(Tag::List(Some(_))) => out.push_str("\\begin{enumerate}\n"),
            Event::Start(Tag::List(None)) => out.push_str("\\begin{itemize}\n"),
            Event::End(TagEnd::List(true)) => out.push_str("\\end{enumerate}\n\n"),
            Event::End(TagEnd::List(false)) => out.push_str("\\end{itemize}\n\n"),
            Event::Start(Tag::Item) => out.push_str("\\item "),
            Event::End(TagEnd::Item) => out.push('\n'),
            Event::Start(Tag::CodeBlock(kind)) => {
                in_code = true;
                if let CodeBlockKind::Fenced(lang) = kind {
                    if !lang.is_empty() {
                        out.push_str(&format!("% {}\n", lang));
                    }
                }
                out.push_str("\\begin{verbatim}\n");
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code = false;
                out.push_str("\\end{verbatim}\n\n");
            }
            Event::Start(Tag::Link { dest_url, .. }) => out.push_str(&format!("\\href{{{}}}{{", escape_latex(&dest_url))),
            Event::End(TagEnd::Link) => out.push('}'),
            Event::Code(code) => out.push_str(&format!("\\texttt{{{}}}", escape_latex(&code))),
            Event::Text(text) if in_code => out.push_str(&text),
            Event::Text(text) => out.push_str(&escape_latex(&text)),
            Event::SoftBreak => out.push('\n'),
            Event::HardBreak => out.push_str("\\\\\n"),
            Event::Rule => out.push_str("\\hrulefill\n\n"),
            _ => {}
        }
    }
    out
}

/// Converted document and its page count.
pub fn convert(markdown: &str, format: OutputFormat, title: &str) -> (String, usize) {
    let pages = split_pages(markdown).len();
    match format {
        OutputFormat::Markdown => (markdown.to_string(), pages),
        OutputFormat::Html => (html_document(title, &markdown_to_html(markdown)), pages),
        OutputFormat::Latex => (markdown_to_latex(markdown), pages),
        OutputFormat::DocxHtml => (docx_html(title, markdown), pages),
        OutputFormat::PptxHtml => {
            let slides = split_slides(markdown);
            (pptx_html(title, &slides), slides.len())
        }
    }
}

pub struct OutputHandler;

#[async_trait::async_trait]
impl StepHandler for OutputHandler {
    fn kind(&self) -> StepKind {
        StepKind::Output
    }

    async fn execute(&self, step: &Step, inputs: &Inputs, env: &StepEnv) -> Result<Value, HandlerError> {
        let output_path = required_text(step, "outputPath", inputs, env)?;
        let path = env.resolve_path(&output_path);
        let format_name = step.config_str("format").unwrap_or("auto");
        let format = OutputFormat::resolve(format_name, &path)?;

        let (source, _) = template_source(step, env).await?;
        let markdown = env.renderer.render(&source, inputs)?;
        let title = step.name.clone();
        let (document, pages) = convert(&markdown, format, &title);

        env.fs
            .write(&path, &document)
            .await
            .map_err(|e| HandlerError::output(format!("cannot write {}: {e}", path.display())))?;
        debug!(step = %step.id, format = format.as_str(), pages, "output written");
        Ok(json!({
            "outputPath": path.display().to_string(),
            "format": format.as_str(),
            "contentLength": document.chars().count(),
            "pages": pages,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_format_follows_extension() {
        assert_eq!(OutputFormat::resolve("auto", Path::new("r.html")).unwrap(), OutputFormat::Html);
        assert_eq!(OutputFormat::resolve("auto", Path::new("r.tex")).unwrap(), OutputFormat::Latex);
        assert_eq!(OutputFormat::resolve("auto", Path::new("r.txt")).unwrap(), OutputFormat::Markdown);
        assert!(OutputFormat::resolve("xlsx", Path::new("r.xlsx")).is_err());
    }

    #[test]
    fn page_breaks_count_pages() {
        let md = "# One\n\n\\pagebreak\n\n# Two\n<!-- pagebreak -->\n# Three\n";
        let (doc, pages) = convert(md, OutputFormat::DocxHtml, "Report");
        assert_eq!(pages, 3);
        assert_eq!(doc.matches("page-break-before:always").count(), 2);
        assert!(doc.contains("urn:schemas-microsoft-com:office:word"));
    }

    #[test]
    fn slides_split_on_rules() {
        let (doc, pages) = convert("# A\n---\n# B\n---\n# C\n", OutputFormat::PptxHtml, "Deck");
        assert_eq!(pages, 3);
        assert!(doc.contains("data-slide=\"3\""));
    }

    #[test]
    fn latex_escapes_and_structures() {
        let tex = markdown_to_latex("# Costs & fees\n\n- 50% off\n- *new*\n");
        assert!(tex.contains("\\section{Costs \\& fees}"));
        assert!(tex.contains("\\item 50\\% off"));
        assert!(tex.contains("\\emph{new}"));
        assert!(tex.trim_end().ends_with("\\end{document}"));
    }

    #[test]
    fn html_wraps_document() {
        let (doc, pages) = convert("| a | b |\n|---|---|\n| 1 | 2 |\n", OutputFormat::Html, "T");
        assert_eq!(pages, 1);
        assert!(doc.starts_with("<!DOCTYPE html>"));
        assert!(doc.contains("<table>"));
    }
}
