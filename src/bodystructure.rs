//! # Body structure and part selection.
//!
//! A message is ingested in two passes. The first pass fetches the
//! `BODYSTRUCTURE`, [`select_parts`] then decides which parts are fetched
//! as displayable text and which are only recorded as attachments.

use std::collections::BTreeMap;

/// Parsed `BODYSTRUCTURE` node, see <https://tools.ietf.org/html/rfc3501#section-7.4.2>.
///
/// Names of types, parameters and dispositions are compared
/// case-insensitively.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BodyStructure {
    /// Section number usable in `BODY[<part_id>]`, e.g. `1.2`.
    ///
    /// Multipart nodes have no section of their own.
    pub part_id: Option<String>,

    /// Media type, e.g. `text`. Missing on malformed nodes.
    pub media_type: Option<String>,

    /// Media subtype, e.g. `plain`.
    pub media_subtype: Option<String>,

    /// Content-Type parameters.
    pub params: BTreeMap<String, String>,

    pub disposition: Option<Disposition>,

    /// Content-Transfer-Encoding.
    pub encoding: Option<String>,

    /// Size in octets of the encoded body.
    pub size: Option<u32>,

    /// Child nodes of a multipart node.
    pub children: Vec<BodyStructure>,
}

/// Content-Disposition of a part.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Disposition {
    /// `inline` or `attachment`.
    pub kind: String,
    pub params: BTreeMap<String, String>,
}

impl BodyStructure {
    /// Creates a leaf node.
    pub fn leaf(part_id: &str, media_type: &str, media_subtype: &str) -> Self {
        Self {
            part_id: Some(part_id.to_string()),
            media_type: Some(media_type.to_string()),
            media_subtype: Some(media_subtype.to_string()),
            ..Default::default()
        }
    }

    /// Creates a multipart node.
    pub fn multipart(media_subtype: &str, children: Vec<BodyStructure>) -> Self {
        Self {
            media_type: Some("multipart".to_string()),
            media_subtype: Some(media_subtype.to_string()),
            children,
            ..Default::default()
        }
    }

    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }

    /// Adds an `attachment` disposition with a `filename` parameter.
    pub fn with_filename(mut self, filename: &str) -> Self {
        let disposition = self.disposition.get_or_insert_with(|| Disposition {
            kind: "attachment".to_string(),
            params: BTreeMap::new(),
        });
        disposition
            .params
            .insert("filename".to_string(), filename.to_string());
        self
    }

    pub fn with_encoding(mut self, encoding: &str, size: u32) -> Self {
        self.encoding = Some(encoding.to_string());
        self.size = Some(size);
        self
    }

    /// Returns `type/subtype` in lowercase, `None` for malformed nodes.
    pub fn mime_type(&self) -> Option<String> {
        let media_type = self.media_type.as_deref()?;
        let media_subtype = self.media_subtype.as_deref().unwrap_or_default();
        Some(format!("{media_type}/{media_subtype}").to_lowercase())
    }

    fn is_multipart(&self) -> bool {
        self.media_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("multipart"))
    }

    /// The `filename` disposition parameter or the `name` content type parameter.
    pub fn name(&self) -> Option<&str> {
        self.disposition
            .as_ref()
            .and_then(|disposition| get_param(&disposition.params, "filename"))
            .or_else(|| get_param(&self.params, "name"))
    }
}

fn get_param<'a>(params: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

/// A part recorded by reference, its body is not fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub part_id: String,

    /// Estimated size after decoding, see [`estimate_decoded_size`].
    pub size_estimate: u64,
}

/// Result of [`select_parts`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PartSelection {
    /// Sections to fetch in the second pass, in document order.
    pub body_parts: Vec<String>,
    pub attachments: Vec<Attachment>,
}

impl PartSelection {
    fn append(&mut self, other: PartSelection) {
        self.body_parts.extend(other.body_parts);
        self.attachments.extend(other.attachments);
    }
}

/// Detached signatures are neither shown nor offered as attachments.
const SIGNATURE_TYPES: &[&str] = &["application/pgp-signature", "application/pkcs7-signature"];

/// Multipart subtypes whose children are considered.
const WALKED_MULTIPARTS: &[&str] = &["alternative", "mixed", "signed"];

/// Walks the structure depth-first and selects the parts to fetch.
///
/// Named parts are attachments unless they are detached signatures, and
/// are never descended into, whatever their type. Unnamed `text/plain`
/// leaves are body parts. Only unnamed `multipart/alternative`,
/// `multipart/mixed` and `multipart/signed` nodes are descended into.
/// Nodes without a media type are skipped but their children are walked.
pub fn select_parts(node: &BodyStructure) -> PartSelection {
    let mut selection = PartSelection::default();

    let Some(mime_type) = node.mime_type() else {
        for child in &node.children {
            selection.append(select_parts(child));
        }
        return selection;
    };

    if let Some(name) = node.name() {
        if SIGNATURE_TYPES.contains(&mime_type.as_str()) {
            return selection;
        }
        if let Some(part_id) = &node.part_id {
            selection.attachments.push(Attachment {
                name: name.to_string(),
                part_id: part_id.clone(),
                size_estimate: estimate_decoded_size(
                    node.size.unwrap_or_default(),
                    node.encoding.as_deref(),
                ),
            });
        }
        return selection;
    }

    if node.is_multipart() {
        let subtype = node.media_subtype.as_deref().unwrap_or_default();
        if WALKED_MULTIPARTS
            .iter()
            .any(|walked| walked.eq_ignore_ascii_case(subtype))
        {
            for child in &node.children {
                selection.append(select_parts(child));
            }
        }
        return selection;
    }

    if mime_type == "text/plain" {
        if let Some(part_id) = &node.part_id {
            selection.body_parts.push(part_id.clone());
        }
    }
    selection
}

/// Estimates the decoded size of a part from its encoded size.
///
/// base64 lines of 76 characters plus CRLF carry 57 octets. For other
/// encodings the encoded size is an upper bound.
pub fn estimate_decoded_size(encoded_size: u32, encoding: Option<&str>) -> u64 {
    let encoded_size = u64::from(encoded_size);
    match encoding {
        Some(encoding) if encoding.eq_ignore_ascii_case("base64") => encoded_size * 57 / 78,
        _ => encoded_size,
    }
}
