use crate::document::{TemplateDocument, TemplateVersion};
use crate::error::DslError;

/// Template format versions this crate understands
pub const SUPPORTED_VERSIONS: [u64; 2] = [2, 3];

/// Parse a YAML (or JSON) string into a TemplateDocument.
///
/// Only the shape of the document and its version are checked here. Deep
/// validation of definitions and references happens in the validation
/// module, policy checks in the compiler.
///
/// # Arguments
///
/// * `source` - YAML or JSON text of a template
///
/// # Returns
///
/// A `Result` containing either the parsed `TemplateDocument` or a `DslError`
pub fn parse_template_document(source: &str) -> Result<TemplateDocument, DslError> {
    // serde_yaml accepts JSON documents as well
    let document: TemplateDocument = serde_yaml::from_str(source)?;

    let supported = match &document.metadata.version {
        TemplateVersion::Number(n) => SUPPORTED_VERSIONS.contains(n),
        TemplateVersion::Text(text) => text
            .trim()
            .parse::<u64>()
            .map(|n| SUPPORTED_VERSIONS.contains(&n))
            .unwrap_or(false),
    };
    if !supported {
        return Err(DslError::UnsupportedVersion(document.metadata.version.to_string()));
    }

    Ok(document)
}
