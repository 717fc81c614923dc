/// System instruction shared by every vision provider
pub const FILENAME_SYSTEM_PROMPT: &str = "You are a helpful assistant that analyzes documents and suggests appropriate filenames. Generate a concise, descriptive filename (without extension) based on the document content. Focus on the main subject, document type, and key identifiers. Use underscores instead of spaces and keep it under 50 characters.";

/// User instruction sent next to the scanned image
pub const FILENAME_USER_PROMPT: &str = "Analyze this document and suggest a filename (without extension) that describes its content. Return only the filename, nothing else.";

/// Sampling temperature for filename suggestions
pub const FILENAME_TEMPERATURE: f32 = 0.3;

/// Output cap for providers that honour it without a thinking budget
pub const FILENAME_MAX_TOKENS: u32 = 50;
