//! Decoded submissions
//!
//! A `Submission` is the in-memory form between decode and persistence:
//! header tree, filing date and the ordered documents with their bytes.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::decoder::{DecodedContainer, RawDocument};
use super::errors::{DecodeError, DecodeResult};
use super::value::OrderedMap;
use crate::accession::Accession;
use crate::codec::Compression;

/// Header keys that carry the accession number, by dialect
const ACCESSION_KEYS: [&str; 2] = ["ACCESSION-NUMBER", "ACCESSION NUMBER"];

/// Normalize a header key: lower-case, spaces to dashes, known aliases
pub fn standardize_key(key: &str) -> String {
    let key = key.trim().to_lowercase().replace(' ', "-");
    match key.as_str() {
        "filed-as-of-date" => "filing-date".to_string(),
        "conformed-submission-type" => "type".to_string(),
        _ => key,
    }
}

/// Per-document entry of `metadata.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDescriptor {
    pub sequence: String,
    pub filename: Option<String>,
    #[serde(rename = "type", default)]
    pub doc_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_byte: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_byte: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<Compression>,
}

impl DocumentDescriptor {
    /// Lower-case extension of the output filename, without the dot
    pub fn extension(&self) -> String {
        let name = self.output_filename();
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_lowercase(),
            _ => String::new(),
        }
    }

    /// File name the document is written under: the declared filename's last
    /// path component, or `{sequence}.txt`
    pub fn output_filename(&self) -> String {
        self.filename
            .as_deref()
            .and_then(sanitize_filename)
            .unwrap_or_else(|| format!("{}.txt", self.sequence))
    }
}

/// Reduce a declared filename to a safe single path component
pub fn sanitize_filename(name: &str) -> Option<String> {
    let last = name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(name)
        .trim();
    if last.is_empty() || last == "." || last == ".." || last.contains('\0') {
        return None;
    }
    Some(last.to_string())
}

/// A document and its bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub descriptor: DocumentDescriptor,
    pub content: Vec<u8>,
}

/// A fully decoded submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub accession: Accession,
    pub filing_date: Option<NaiveDate>,
    pub header: OrderedMap,
    pub documents: Vec<Document>,
}

impl Submission {
    /// Build a submission from decoder output. `accession` wins over the
    /// header's own accession number when both are present.
    pub fn from_decoded(accession: Option<Accession>, decoded: DecodedContainer) -> DecodeResult<Self> {
        let accession = match accession {
            Some(accession) => accession,
            None => header_accession(&decoded.header)?,
        };
        let filing_date = header_filing_date(&decoded.header);

        let mut used = HashSet::new();
        let documents = decoded
            .documents
            .into_iter()
            .enumerate()
            .map(|(index, raw)| build_document(index, raw, &mut used))
            .collect();

        Ok(Self {
            accession,
            filing_date,
            header: decoded.header,
            documents,
        })
    }

    /// Declared submission type, if the header has one
    pub fn submission_type(&self) -> Option<&str> {
        self.header
            .iter()
            .find(|(k, _)| standardize_key(k) == "type")
            .and_then(|(_, v)| v.as_str())
    }

    /// Keep only documents whose type is listed (case-insensitive)
    pub fn retain_types(&mut self, types: &[String]) {
        self.documents.retain(|doc| {
            types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&doc.descriptor.doc_type))
        });
    }

    pub fn total_bytes(&self) -> u64 {
        self.documents.iter().map(|d| d.content.len() as u64).sum()
    }
}

fn header_accession(header: &OrderedMap) -> DecodeResult<Accession> {
    let raw = ACCESSION_KEYS
        .iter()
        .find_map(|key| header.get_str(key))
        .ok_or_else(|| DecodeError::MissingAccession("not declared in header".to_string()))?;
    Accession::parse(raw).map_err(|e| DecodeError::MissingAccession(e.to_string()))
}

fn header_filing_date(header: &OrderedMap) -> Option<NaiveDate> {
    header.iter().find_map(|(key, value)| {
        if standardize_key(key) != "filing-date" {
            return None;
        }
        let raw = value.as_str()?.trim();
        NaiveDate::parse_from_str(raw, "%Y%m%d")
            .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
            .ok()
    })
}

fn build_document(index: usize, raw: RawDocument, used: &mut HashSet<String>) -> Document {
    let field = |key: &str| {
        raw.fields
            .get_str(key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let sequence = field("SEQUENCE").unwrap_or_else(|| (index + 1).to_string());
    let declared = field("FILENAME").and_then(|name| sanitize_filename(&name));

    // Declared and synthesized names share one namespace per submission.
    let wanted = declared
        .clone()
        .unwrap_or_else(|| format!("{}.txt", sequence));
    let name = unique_name(&wanted, &sequence, used);
    let filename = if declared.is_some() || name != wanted {
        Some(name)
    } else {
        None
    };

    let descriptor = DocumentDescriptor {
        sequence,
        filename,
        doc_type: field("TYPE").unwrap_or_default(),
        description: field("DESCRIPTION"),
        size_bytes: raw.content.len() as u64,
        start_byte: None,
        end_byte: None,
        compression: None,
    };

    Document {
        descriptor,
        content: raw.content,
    }
}

/// First free name among `name`, `{sequence}-{name}`, `{sequence}-{n}-{name}`
fn unique_name(name: &str, sequence: &str, used: &mut HashSet<String>) -> String {
    let mut candidate = name.to_string();
    let mut n = 1;
    while used.contains(&candidate) {
        candidate = if n == 1 {
            format!("{}-{}", sequence, name)
        } else {
            format!("{}-{}-{}", sequence, n, name)
        };
        n += 1;
    }
    used.insert(candidate.clone());
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sgml::decoder::{decode, DecodeOptions};

    fn descriptor(sequence: &str, filename: Option<&str>) -> DocumentDescriptor {
        DocumentDescriptor {
            sequence: sequence.to_string(),
            filename: filename.map(str::to_string),
            doc_type: "EX-99".to_string(),
            description: None,
            size_bytes: 0,
            start_byte: None,
            end_byte: None,
            compression: None,
        }
    }

    #[test]
    fn test_standardize_key() {
        assert_eq!(standardize_key("FILED AS OF DATE"), "filing-date");
        assert_eq!(standardize_key("CONFORMED SUBMISSION TYPE"), "type");
        assert_eq!(standardize_key("COMPANY-DATA"), "company-data");
        assert_eq!(standardize_key(" Central Index Key "), "central-index-key");
    }

    #[test]
    fn test_output_filename() {
        assert_eq!(descriptor("3", Some("ex99.htm")).output_filename(), "ex99.htm");
        assert_eq!(descriptor("3", None).output_filename(), "3.txt");
        assert_eq!(descriptor("3", Some("../../etc/passwd")).output_filename(), "passwd");
        assert_eq!(descriptor("3", Some("dir/..")).output_filename(), "3.txt");
        assert_eq!(descriptor("3", Some("C:\\tmp\\a.pdf")).output_filename(), "a.pdf");
    }

    #[test]
    fn test_extension() {
        assert_eq!(descriptor("1", Some("Report.PDF")).extension(), "pdf");
        assert_eq!(descriptor("1", None).extension(), "txt");
        assert_eq!(descriptor("1", Some("README")).extension(), "");
    }

    #[test]
    fn test_from_decoded() {
        let input = "<SUBMISSION>
<ACCESSION-NUMBER>0000950123-09-012345
<TYPE>10-K
<FILING-DATE>20090301
<DOCUMENT>
<TYPE>10-K
<SEQUENCE>1
<FILENAME>main.htm
<TEXT>
main
</TEXT>
</DOCUMENT>
<DOCUMENT>
<TYPE>EX-99
<FILENAME>main.htm
<TEXT>
exhibit
</TEXT>
</DOCUMENT>
</SUBMISSION>
";
        let decoded = decode(input.as_bytes(), DecodeOptions::strict()).unwrap();
        let submission = Submission::from_decoded(None, decoded).unwrap();

        assert_eq!(submission.accession.no_dash(), "000095012309012345");
        assert_eq!(submission.filing_date, NaiveDate::from_ymd_opt(2009, 3, 1));
        assert_eq!(submission.submission_type(), Some("10-K"));
        assert_eq!(submission.total_bytes(), 13);

        let second = &submission.documents[1].descriptor;
        assert_eq!(second.sequence, "2");
        assert_eq!(second.output_filename(), "2-main.htm");
    }

    #[test]
    fn test_accession_argument_wins() {
        let decoded = decode(b"plain text\n", DecodeOptions::strict()).unwrap();
        let accession = Accession::from(42u64);
        let submission = Submission::from_decoded(Some(accession.clone()), decoded).unwrap();
        assert_eq!(submission.accession, accession);
        assert_eq!(submission.filing_date, None);
    }

    #[test]
    fn test_missing_accession() {
        let decoded = decode(b"plain text\n", DecodeOptions::strict()).unwrap();
        assert!(matches!(
            Submission::from_decoded(None, decoded),
            Err(DecodeError::MissingAccession(_))
        ));
    }

    #[test]
    fn test_retain_types() {
        let input = "<DOCUMENT>\n<TYPE>10-K\n<SEQUENCE>1\n</DOCUMENT>\n<DOCUMENT>\n<TYPE>GRAPHIC\n<SEQUENCE>2\n</DOCUMENT>\n";
        let decoded = decode(input.as_bytes(), DecodeOptions::strict()).unwrap();
        let mut submission = Submission::from_decoded(Some(Accession::from(1u64)), decoded).unwrap();

        submission.retain_types(&["10-k".to_string()]);
        assert_eq!(submission.documents.len(), 1);
        assert_eq!(submission.documents[0].descriptor.doc_type, "10-K");
    }

    fn filenames(input: &str) -> Vec<String> {
        let decoded = decode(input.as_bytes(), DecodeOptions::strict()).unwrap();
        Submission::from_decoded(Some(Accession::from(1u64)), decoded)
            .unwrap()
            .documents
            .iter()
            .map(|doc| doc.descriptor.output_filename())
            .collect()
    }

    #[test]
    fn test_declared_name_shadows_synthesized_name() {
        let input = "<DOCUMENT>\n<TYPE>EX-1\n<SEQUENCE>1\n<FILENAME>2.txt\n<TEXT>\nfirst\n</TEXT>\n</DOCUMENT>\n<DOCUMENT>\n<TYPE>EX-2\n<SEQUENCE>2\n<TEXT>\nsecond\n</TEXT>\n</DOCUMENT>\n";
        assert_eq!(filenames(input), vec!["2.txt", "2-2.txt"]);
    }

    #[test]
    fn test_synthesized_name_shadows_declared_name() {
        let input = "<DOCUMENT>\n<TYPE>EX-1\n<SEQUENCE>1\n<TEXT>\nfirst\n</TEXT>\n</DOCUMENT>\n<DOCUMENT>\n<TYPE>EX-2\n<SEQUENCE>2\n<FILENAME>1.txt\n<TEXT>\nsecond\n</TEXT>\n</DOCUMENT>\n";
        assert_eq!(filenames(input), vec!["1.txt", "2-1.txt"]);
    }

    #[test]
    fn test_repeated_sequence_without_filenames() {
        let input = "<DOCUMENT>\n<TYPE>EX-1\n<SEQUENCE>1\n</DOCUMENT>\n<DOCUMENT>\n<TYPE>EX-2\n<SEQUENCE>1\n</DOCUMENT>\n<DOCUMENT>\n<TYPE>EX-3\n<SEQUENCE>1\n</DOCUMENT>\n";
        assert_eq!(filenames(input), vec!["1.txt", "1-1.txt", "1-2-1.txt"]);
    }
}
