//! Plain-text extraction for binary formats: PDF and OOXML (docx, pptx, xlsx).

use quick_xml::Reader;
use quick_xml::events::Event;
use std::io::{Cursor, Read};

use super::IngestionError;

/// Decompressed size cap for any single archive entry.
const MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
const MAX_SHEETS: usize = 100;
const MAX_CELLS_PER_SHEET: usize = 100_000;

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn failure(kind: &'static str, message: impl ToString) -> IngestionError {
    IngestionError::Extraction {
        kind,
        message: message.to_string(),
    }
}

pub(crate) fn pdf_text(bytes: &[u8]) -> Result<String, IngestionError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|error| failure("pdf", error))
}

pub(crate) fn docx_text(bytes: &[u8]) -> Result<String, IngestionError> {
    let mut archive = open_archive(bytes, "docx")?;
    let xml = read_entry(&mut archive, "word/document.xml", "docx")?;
    let paragraphs = text_runs(&xml, b"t", Some(b"p"), "docx")?;
    Ok(paragraphs.join("\n"))
}

pub(crate) fn pptx_text(bytes: &[u8]) -> Result<String, IngestionError> {
    let mut archive = open_archive(bytes, "pptx")?;
    let slides = numbered_entries(&archive, "ppt/slides/slide");
    let mut blocks = Vec::with_capacity(slides.len());
    for name in slides {
        let xml = read_entry(&mut archive, &name, "pptx")?;
        let paragraphs = text_runs(&xml, b"t", Some(b"p"), "pptx")?;
        if !paragraphs.is_empty() {
            blocks.push(paragraphs.join("\n"));
        }
    }
    Ok(blocks.join("\n\n"))
}

pub(crate) fn xlsx_text(bytes: &[u8]) -> Result<String, IngestionError> {
    let mut archive = open_archive(bytes, "xlsx")?;
    let shared = if archive.file_names().any(|name| name == "xl/sharedStrings.xml") {
        let xml = read_entry(&mut archive, "xl/sharedStrings.xml", "xlsx")?;
        text_runs(&xml, b"t", Some(b"si"), "xlsx")?
    } else {
        Vec::new()
    };
    let sheets = numbered_entries(&archive, "xl/worksheets/sheet");
    let mut blocks = Vec::new();
    for name in sheets.into_iter().take(MAX_SHEETS) {
        let xml = read_entry(&mut archive, &name, "xlsx")?;
        let rows = sheet_rows(&xml, &shared)?;
        if !rows.is_empty() {
            blocks.push(rows.join("\n"));
        }
    }
    Ok(blocks.join("\n\n"))
}

fn open_archive<'a>(bytes: &'a [u8], kind: &'static str) -> Result<Archive<'a>, IngestionError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|error| failure(kind, error))
}

fn read_entry(
    archive: &mut Archive<'_>,
    name: &str,
    kind: &'static str,
) -> Result<Vec<u8>, IngestionError> {
    let entry = archive.by_name(name).map_err(|error| failure(kind, format!("{name}: {error}")))?;
    let mut out = Vec::new();
    entry
        .take(MAX_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|error| failure(kind, error))?;
    if out.len() as u64 >= MAX_ENTRY_BYTES {
        return Err(failure(kind, format!("{name} exceeds {MAX_ENTRY_BYTES} bytes")));
    }
    Ok(out)
}

/// Archive entries `<prefix>N.xml` ordered by `N`.
fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|name| name.starts_with(prefix) && name.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Concatenate the text of every `<text_tag>` element, one string per `<group_tag>` element.
fn text_runs(
    xml: &[u8],
    text_tag: &[u8],
    group_tag: Option<&[u8]>,
    kind: &'static str,
) -> Result<Vec<String>, IngestionError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut groups = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) if element.local_name().as_ref() == text_tag => {
                in_text = true;
            }
            Ok(Event::Text(text)) if in_text => {
                current.push_str(&text.unescape().unwrap_or_default());
            }
            Ok(Event::End(element)) => {
                let name = element.local_name();
                if name.as_ref() == text_tag {
                    in_text = false;
                } else if Some(name.as_ref()) == group_tag && !current.trim().is_empty() {
                    groups.push(std::mem::take(&mut current));
                } else if Some(name.as_ref()) == group_tag {
                    current.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(error) => return Err(failure(kind, error)),
            _ => {}
        }
        buf.clear();
    }
    if !current.trim().is_empty() {
        groups.push(current);
    }
    Ok(groups)
}

/// Render a worksheet as comma-joined rows, resolving shared-string cells.
fn sheet_rows(xml: &[u8], shared: &[String]) -> Result<Vec<String>, IngestionError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut in_value = false;
    let mut shared_cell = false;
    let mut cells = 0usize;
    loop {
        if cells >= MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) => match element.local_name().as_ref() {
                b"c" => {
                    shared_cell = element.attributes().flatten().any(|attribute| {
                        attribute.key.as_ref() == b"t" && attribute.value.as_ref() == b"s"
                    });
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(text)) if in_value => {
                let raw = text.unescape().unwrap_or_default();
                let value = raw.trim();
                let rendered = if shared_cell {
                    value
                        .parse::<usize>()
                        .ok()
                        .and_then(|index| shared.get(index).cloned())
                        .unwrap_or_default()
                } else {
                    value.to_string()
                };
                if !rendered.is_empty() {
                    row.push(rendered);
                    cells += 1;
                }
            }
            Ok(Event::End(element)) => match element.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => shared_cell = false,
                b"row" if !row.is_empty() => rows.push(std::mem::take(&mut row).join(",")),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(error) => return Err(failure("xlsx", error)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}
