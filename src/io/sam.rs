//! SAM text import and export.
//!
//! Only the fields of [`AlignmentRecord`] are carried: `RG`, `MD` and `OQ`
//! tags are read and written, every other optional tag is dropped. `TLEN` is
//! written as 0.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use super::SamError;
use crate::model::{format_cigar, parse_cigar, AlignmentRecord, Flags};

const PHRED_OFFSET: u8 = 33;

/// Header lines and records of a SAM file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamFile {
    /// `@` lines, verbatim.
    pub header: Vec<String>,
    /// Records in file order.
    pub records: Vec<AlignmentRecord>,
}

/// Read SAM text.
pub fn read_sam<R: BufRead>(reader: R) -> Result<SamFile, SamError> {
    let mut file = SamFile::default();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        if line.starts_with('@') {
            file.header.push(line);
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_record(&line).map_err(|reason| SamError::Malformed {
            line: line_no,
            reason,
        })?;
        record
            .validate()
            .map_err(|source| SamError::Invalid {
                line: line_no,
                source,
            })?;
        file.records.push(record);
    }
    Ok(file)
}

/// Read a SAM file from disk.
pub fn read_sam_path(path: impl AsRef<Path>) -> Result<SamFile, SamError> {
    let file = File::open(path)?;
    read_sam(BufReader::new(file))
}

fn parse_record(line: &str) -> Result<AlignmentRecord, String> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 11 {
        return Err(format!("expected at least 11 columns, found {}", fields.len()));
    }
    let number = |idx: usize, name: &str| -> Result<u64, String> {
        fields[idx]
            .parse::<u64>()
            .map_err(|_| format!("{} '{}' is not a number", name, fields[idx]))
    };

    let flags = Flags::from_bits(
        u16::try_from(number(1, "FLAG")?).map_err(|_| "FLAG out of range".to_string())?,
    );
    let mapq = u8::try_from(number(4, "MAPQ")?).map_err(|_| "MAPQ out of range".to_string())?;
    let pos = u32::try_from(number(3, "POS")?).map_err(|_| "POS out of range".to_string())?;
    let pnext = u32::try_from(number(7, "PNEXT")?).map_err(|_| "PNEXT out of range".to_string())?;

    let name_or_none = |text: &str| -> Option<Arc<str>> {
        (text != "*").then(|| Arc::from(text))
    };
    let reference_name = name_or_none(fields[2]);
    let mate_reference_name = match fields[6] {
        "=" => reference_name.clone(),
        other => name_or_none(other),
    };

    let cigar = if fields[5] == "*" {
        Vec::new()
    } else {
        parse_cigar(fields[5]).map_err(|e| e.to_string())?
    };
    let sequence: Arc<[u8]> = if fields[9] == "*" {
        Arc::from(Vec::new())
    } else {
        Arc::from(fields[9].to_ascii_uppercase().into_bytes())
    };
    let quality_scores = decode_qualities(fields[10])?;

    let mut record = AlignmentRecord {
        read_name: Arc::from(fields[0]),
        sequence,
        quality_scores,
        reference_name,
        reference_position: pos.checked_sub(1),
        cigar,
        mapping_quality: mapq,
        flags,
        mate_reference_name,
        mate_position: pnext.checked_sub(1),
        ..AlignmentRecord::default()
    };
    if flags.is_unmapped() {
        record.reference_name = None;
        record.reference_position = None;
        record.cigar.clear();
    }

    for tag in &fields[11..] {
        let mut parts = tag.splitn(3, ':');
        let (Some(name), Some(kind), Some(value)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("malformed tag '{}'", tag));
        };
        match (name, kind) {
            ("RG", "Z") => record.read_group_id = Some(Arc::from(value)),
            ("MD", "Z") => record.mismatching_positions = Some(Arc::from(value)),
            ("OQ", "Z") => record.original_quality_scores = decode_qualities(value)?,
            _ => {}
        }
    }
    Ok(record)
}

fn decode_qualities(text: &str) -> Result<Arc<[u8]>, String> {
    if text == "*" {
        return Ok(Arc::from(Vec::new()));
    }
    text.bytes()
        .map(|b| {
            b.checked_sub(PHRED_OFFSET)
                .ok_or_else(|| format!("quality character '{}' below '!'", b as char))
        })
        .collect::<Result<Vec<u8>, String>>()
        .map(Arc::from)
}

fn encode_qualities(qualities: &[u8]) -> String {
    if qualities.is_empty() {
        return "*".to_string();
    }
    qualities
        .iter()
        .map(|&q| char::from(q.min(93) + PHRED_OFFSET))
        .collect()
}

/// Header written when none is supplied: `@HD` plus one `@RG` per read group.
pub fn default_header(records: &[AlignmentRecord], coordinate_sorted: bool) -> Vec<String> {
    let order = if coordinate_sorted { "coordinate" } else { "unknown" };
    let mut header = vec![format!("@HD\tVN:1.6\tSO:{}", order)];
    let groups: BTreeSet<&str> = records
        .iter()
        .filter_map(|r| r.read_group_id.as_deref())
        .collect();
    header.extend(groups.into_iter().map(|rg| format!("@RG\tID:{}", rg)));
    header
}

/// Format one record as a SAM line, without the trailing newline.
pub fn format_record(record: &AlignmentRecord) -> String {
    let star = |s: Option<&str>| s.unwrap_or("*").to_string();
    let rnext = match (&record.mate_reference_name, &record.reference_name) {
        (Some(mate), Some(own)) if mate == own => "=".to_string(),
        (mate, _) => star(mate.as_deref()),
    };
    let mut line = format!(
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t0\t{}\t{}",
        record.read_name,
        record.flags.bits(),
        star(record.reference_name.as_deref()),
        record.reference_position.map_or(0, |p| p + 1),
        record.mapping_quality,
        if record.cigar.is_empty() {
            "*".to_string()
        } else {
            format_cigar(&record.cigar)
        },
        rnext,
        record.mate_position.map_or(0, |p| p + 1),
        if record.sequence.is_empty() {
            "*".to_string()
        } else {
            String::from_utf8_lossy(&record.sequence).into_owned()
        },
        encode_qualities(&record.quality_scores),
    );
    if let Some(rg) = &record.read_group_id {
        line.push_str("\tRG:Z:");
        line.push_str(rg);
    }
    if let Some(md) = &record.mismatching_positions {
        line.push_str("\tMD:Z:");
        line.push_str(md);
    }
    if !record.original_quality_scores.is_empty() {
        line.push_str("\tOQ:Z:");
        line.push_str(&encode_qualities(&record.original_quality_scores));
    }
    line
}

/// Write header lines and records as SAM text.
pub fn write_sam<W: Write>(
    mut out: W,
    header: &[String],
    records: &[AlignmentRecord],
) -> Result<(), SamError> {
    for line in header {
        writeln!(out, "{}", line)?;
    }
    for record in records {
        writeln!(out, "{}", format_record(record))?;
    }
    out.flush()?;
    Ok(())
}

/// Write a SAM file to disk.
pub fn write_sam_path(
    path: impl AsRef<Path>,
    header: &[String],
    records: &[AlignmentRecord],
) -> Result<(), SamError> {
    let file = File::create(path)?;
    write_sam(BufWriter::new(file), header, records)
}
