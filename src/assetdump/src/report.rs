//! Report rendering
//!
//! The HTML report holds one section per indexed file:
//!
//! ```text
//! <h1>{file name}</h1>
//! <table>
//! 	<tr><th>Path</th><th>Available types</th></tr>
//! 	<tr><td>{path}</td><td>{label}[ (multiple ({n}))]<br/>...</td></tr>
//! </table>
//! ```

use std::borrow::Cow;
use std::io::Write;

use serde::Serialize;

use crate::index::{PathEntry, PathTypeIndex};
use crate::Result;

/// Receives each indexed file's finished index
pub trait ReportSink {
    fn write_section(&mut self, file_name: &str, index: &PathTypeIndex) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl ReportSink for Vec<Box<dyn ReportSink>> {
    fn write_section(&mut self, file_name: &str, index: &PathTypeIndex) -> Result<()> {
        for sink in self.iter_mut() {
            sink.write_section(file_name, index)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        for sink in self.iter_mut() {
            sink.finish()?;
        }
        Ok(())
    }
}

/// Escape text for HTML element content
pub fn escape_html(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"']) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

fn type_cell(entry: &PathEntry) -> String {
    entry
        .types
        .iter()
        .map(|(label, count)| {
            if *count > 1 {
                format!("{} (multiple ({}))", escape_html(label), count)
            } else {
                escape_html(label).into_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("<br/>")
}

/// Render one file's section
pub fn render_section(file_name: &str, index: &PathTypeIndex) -> String {
    let mut out = String::new();
    out.push_str(&format!("<h1>{}</h1>\n", escape_html(file_name)));
    out.push_str("<table>\n");
    out.push_str("\t<tr><th>Path</th><th>Available types</th></tr>\n");
    for entry in index {
        out.push_str(&format!(
            "\t<tr><td>{}</td><td>{}</td></tr>\n",
            escape_html(&entry.path),
            type_cell(entry)
        ));
    }
    out.push_str("</table>\n");
    out
}

/// HTML report written section by section
pub struct HtmlReport<W: Write> {
    writer: W,
    sections: usize,
}

impl<W: Write> HtmlReport<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            sections: 0,
        }
    }

    pub fn sections(&self) -> usize {
        self.sections
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ReportSink for HtmlReport<W> {
    fn write_section(&mut self, file_name: &str, index: &PathTypeIndex) -> Result<()> {
        self.writer
            .write_all(render_section(file_name, index).as_bytes())?;
        self.sections += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Serialize)]
struct JsonSection<'a> {
    file: &'a str,
    paths: &'a PathTypeIndex,
}

/// JSON array of `{ "file": …, "paths": { path: { label: count } } }`
pub struct JsonReport<W: Write> {
    writer: W,
    sections: usize,
}

impl<W: Write> JsonReport<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            sections: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ReportSink for JsonReport<W> {
    fn write_section(&mut self, file_name: &str, index: &PathTypeIndex) -> Result<()> {
        self.writer
            .write_all(if self.sections == 0 { b"[\n" } else { b",\n" })?;
        serde_json::to_writer_pretty(
            &mut self.writer,
            &JsonSection {
                file: file_name,
                paths: index,
            },
        )?;
        self.sections += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let tail: &[u8] = if self.sections == 0 { b"[]\n" } else { b"\n]\n" };
        self.writer.write_all(tail)?;
        self.writer.flush()?;
        Ok(())
    }
}
