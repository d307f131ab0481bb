//! Human readable names for well known resource types

use std::borrow::Cow;

use crate::types::COMPRESSION_DIRECTORY_TYPE;

const KNOWN_TYPES: &[(u32, &str)] = &[
    // Create-a-Sim
    (0x034AEECB, "CASPart"),
    (0x0355E0A6, "BodyBlendData"),
    // Tuning and data
    (0x0333406C, "Tuning"),
    (0x025ED6F4, "SimData"),
    (0x545AC67A, "CombinedTuning"),
    // Text
    (0x220557DA, "StringTable"),
    // Images
    (0x00B2D882, "DDS"),
    (0x3C1AF1F2, "PNG"),
    (0x2F7D0004, "DST"),
    // Models
    (0x015A1849, "Geometry"),
    (0x00AE6C67, "Bone"),
    (0x8EAF13DE, "RIG"),
    // Catalog
    (0xC0DB5AE7, "CatalogObject"),
    (0x319E4F1D, "ObjectDefinition"),
    // Animation
    (0x02D5DF13, "CLIP"),
    // Audio
    (0x01EEF63A, "AuditoryData"),
    // Thumbnails
    (0x3C2A8647, "Thumbnail"),
    (0x5B282D45, "ThumbnailAlt"),
    // Container
    (COMPRESSION_DIRECTORY_TYPE, "CompressionDirectory"),
];

/// Name of a well known type, if there is one
pub fn known_type_name(type_id: u32) -> Option<&'static str> {
    KNOWN_TYPES
        .iter()
        .find(|(id, _)| *id == type_id)
        .map(|(_, name)| *name)
}

/// Name of a type, falling back to `Unknown_XXXXXXXX`
pub fn type_name(type_id: u32) -> Cow<'static, str> {
    match known_type_name(type_id) {
        Some(name) => Cow::Borrowed(name),
        None => Cow::Owned(format!("Unknown_{type_id:08X}")),
    }
}

/// Reverse lookup used when filtering by name
pub fn type_id_for_name(name: &str) -> Option<u32> {
    KNOWN_TYPES
        .iter()
        .find(|(_, known)| known.eq_ignore_ascii_case(name))
        .map(|(id, _)| *id)
        .or_else(|| {
            name.strip_prefix("Unknown_")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
        })
}
