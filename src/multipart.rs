use std::path::Path;

use crate::error::{Error, Result};

/// A file attached to a form-data request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormDataFile {
    /// Form field name
    pub field_name: String,
    /// Raw file contents
    pub data: Vec<u8>,
    /// File name reported to the server
    pub file_name: String,
    /// MIME type of the contents
    pub mime_type: String,
}

impl FormDataFile {
    /// Create a new attachment from bytes
    pub fn new(
        field_name: impl Into<String>,
        data: Vec<u8>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            data,
            file_name: file_name.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Read an attachment from disk, guessing its MIME type from the extension
    pub fn from_path(field_name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::multipart(format!("File not found: {}", path.display())));
        }
        let data = std::fs::read(path)
            .map_err(|e| Error::multipart(format!("Failed to read file {}: {}", path.display(), e)))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();
        let mime_type = content_type_for_file(path).unwrap_or("application/octet-stream");

        Ok(Self::new(field_name, data, file_name, mime_type))
    }
}

#[derive(Debug, Clone)]
enum Part {
    Field { name: String, value: String },
    File(FormDataFile),
}

/// Serializes multipart/form-data bodies
///
/// One builder per request: it owns the boundary and every part, and
/// [`build`](MultipartBuilder::build) renders them all at once.
#[derive(Debug, Clone)]
pub struct MultipartBuilder {
    boundary: String,
    parts: Vec<Part>,
}

impl MultipartBuilder {
    /// Create a new builder with a random boundary
    pub fn new() -> Self {
        Self::with_boundary(generate_boundary())
    }

    /// Create a new builder with a fixed boundary
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// `Content-Type` header value for this body
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Add a text field
    pub fn add_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.parts.push(Part::Field {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Add a file
    pub fn add_file(&mut self, file: FormDataFile) {
        self.parts.push(Part::File(file));
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Render the body
    pub fn build(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for part in &self.parts {
            body.extend_from_slice(format!("\r\n--{}\r\n", self.boundary).as_bytes());
            match part {
                Part::Field { name, value } => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", escape_name(name)).as_bytes(),
                    );
                    body.extend_from_slice(value.as_bytes());
                }
                Part::File(file) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                            escape_name(&file.field_name),
                            escape_name(&file.file_name)
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", file.mime_type).as_bytes());
                    body.extend_from_slice(&file.data);
                }
            }
        }
        body.extend_from_slice(format!("\r\n--{}--\r\n", self.boundary).as_bytes());
        body
    }
}

impl Default for MultipartBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Escape a quoted `Content-Disposition` parameter the way browsers do
fn escape_name(name: &str) -> String {
    name.replace('"', "%22").replace('\r', "%0D").replace('\n', "%0A")
}

/// Generate a random boundary for multipart forms
fn generate_boundary() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    format!("Boundary-{}", hex::encode(bytes))
}

/// Get the content type for a file based on its extension
pub fn content_type_for_file(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        _ => return None,
    };
    Some(mime)
}
