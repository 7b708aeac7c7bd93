use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use std::path::Path;

use crate::feed::parser::Entry;

/// Fixed channel metadata of the published feed.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct ChannelInfo {
    pub title: String,
    pub link: String,
    pub description: String,
}

impl Default for ChannelInfo {
    fn default() -> Self {
        Self {
            title: "Student Entrepreneurs Feed".to_string(),
            link: "https://tbshiki.github.io/studententrepreneursfeed/".to_string(),
            description: "This FEED is a compilation of student entrepreneurship information. We wish you success.".to_string(),
        }
    }
}

/// Renders entries as a pretty-printed RSS 2.0 document.
///
/// Items keep the order of `entries`. `pubDate` is written only for entries
/// that carried a structured timestamp, in the offset of `built_at`.
pub fn render_rss(
    channel: &ChannelInfo,
    entries: &[Entry],
    built_at: DateTime<FixedOffset>,
) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    let offset = *built_at.offset();

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Failed to write XML declaration")?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    writer
        .write_event(Event::Start(rss))
        .context("Failed to write rss element")?;
    writer
        .write_event(Event::Start(BytesStart::new("channel")))
        .context("Failed to write channel element")?;

    write_text_element(&mut writer, "title", &channel.title)?;
    write_text_element(&mut writer, "link", &channel.link)?;
    write_text_element(&mut writer, "description", &channel.description)?;
    write_text_element(&mut writer, "lastBuildDate", &built_at.to_rfc2822())?;
    write_text_element(&mut writer, "generator", concat!("feedscout ", env!("CARGO_PKG_VERSION")))?;

    for entry in entries {
        writer
            .write_event(Event::Start(BytesStart::new("item")))
            .context("Failed to write item element")?;

        write_text_element(&mut writer, "title", &entry.title)?;
        write_text_element(&mut writer, "link", &entry.link)?;
        write_text_element(&mut writer, "description", &entry.description)?;

        let mut guid = BytesStart::new("guid");
        guid.push_attribute(("isPermaLink", "false"));
        writer
            .write_event(Event::Start(guid))
            .context("Failed to write guid element")?;
        writer
            .write_event(Event::Text(BytesText::new(&entry.normalized_link)))
            .context("Failed to write guid text")?;
        writer
            .write_event(Event::End(BytesEnd::new("guid")))
            .context("Failed to write guid end")?;

        if let Some(published) = entry.published {
            let local = published.with_timezone(&offset);
            write_text_element(&mut writer, "pubDate", &local.to_rfc2822())?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("item")))
            .context("Failed to write item end")?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("channel")))
        .context("Failed to write channel end")?;
    writer
        .write_event(Event::End(BytesEnd::new("rss")))
        .context("Failed to write rss end")?;

    let result = writer.into_inner().into_inner();
    String::from_utf8(result).context("Generated RSS contains invalid UTF-8")
}

fn write_text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &str,
) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .with_context(|| format!("Failed to write {name} element"))?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .with_context(|| format!("Failed to write {name} text"))?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .with_context(|| format!("Failed to write {name} end"))?;
    Ok(())
}

/// Writes the rendered feed to `path` atomically.
///
/// The parent directory is created if missing. Content goes to a temporary
/// file in the same directory, is synced, then renamed over `path`, so
/// readers never observe a partial document.
pub fn publish_to_file(
    channel: &ChannelInfo,
    entries: &[Entry],
    built_at: DateTime<FixedOffset>,
    path: &Path,
) -> Result<()> {
    let content = render_rss(channel, entries, built_at)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory '{}'", parent.display()))?;
    }

    let temp_path = path.with_extension(format!("tmp.{}", std::process::id()));

    let mut file = std::fs::File::create(&temp_path).with_context(|| {
        format!(
            "Failed to create temporary file '{}': check directory permissions",
            temp_path.display()
        )
    })?;

    std::io::Write::write_all(&mut file, content.as_bytes()).with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!("Failed to write feed to temporary file '{}'", temp_path.display())
    })?;

    file.sync_all().with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!("Failed to sync temporary file '{}' to disk", temp_path.display())
    })?;

    drop(file);

    std::fs::rename(&temp_path, path).with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!(
            "Failed to rename '{}' to '{}'",
            temp_path.display(),
            path.display()
        )
    })?;

    tracing::info!(path = %path.display(), items = entries.len(), "Published feed");
    Ok(())
}
