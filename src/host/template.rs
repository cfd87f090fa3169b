//! Attachment folders from a path template such as `./${noteName}`.

use super::AttachmentPathPolicy;
use crate::path;

pub const NOTE_NAME_TOKEN: &str = "${noteName}";
pub const NOTE_FOLDER_TOKEN: &str = "${noteFolder}";

/// Attachment folder from a template such as `./${noteName}` or `assets`.
///
/// A leading `./` makes the folder relative to the note's folder; anything
/// else is a vault path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplatePolicy {
    template: String,
}

impl TemplatePolicy {
    pub fn new(template: impl Into<String>) -> TemplatePolicy {
        TemplatePolicy {
            template: template.into(),
        }
    }

    fn is_relative(&self) -> bool {
        self.template == "." || self.template.starts_with("./")
    }
}

impl AttachmentPathPolicy for TemplatePolicy {
    fn attachment_folder(&self, note_path: &str) -> Option<String> {
        let name = path::stem(note_path);
        if name.is_empty() {
            return None;
        }
        let folder = self
            .template
            .replace(NOTE_NAME_TOKEN, name)
            .replace(NOTE_FOLDER_TOKEN, path::parent(note_path));
        let folder = if self.is_relative() {
            path::join(path::parent(note_path), &folder)
        } else {
            folder
        };
        Some(path::normalize(&folder))
    }

    fn depends_on_note_path(&self) -> bool {
        self.is_relative()
            || self.template.contains(NOTE_NAME_TOKEN)
            || self.template.contains(NOTE_FOLDER_TOKEN)
    }

    fn is_dedicated_folder(&self) -> bool {
        self.template.contains(NOTE_NAME_TOKEN)
    }
}
