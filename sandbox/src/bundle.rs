//! The three-language source snapshot being edited.

use serde::{Deserialize, Serialize};

/// Three independently mutable sources, one per editor tab.
///
/// No length or content validation is performed: arbitrary markup and
/// script are accepted, including malformed HTML. The executed document's
/// own parser governs recovery. A bundle lives for the editing session and
/// is never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceBundle {
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub css: String,
    #[serde(default)]
    pub js: String,
}

impl SourceBundle {
    /// Starter content seeded into a fresh editing session.
    pub fn starter() -> Self {
        Self {
            html: concat!(
                "<div>\n",
                "  <h1>Hello, World!</h1>\n",
                "  <p>This is your HTML code.</p>\n",
                "</div>",
            )
            .to_string(),
            css: concat!(
                "body {\n",
                "  font-family: Arial, sans-serif;\n",
                "  background-color: #fff;\n",
                "  color: #333;\n",
                "}\n",
                "h1 {\n",
                "  color: #4A90E2;\n",
                "}",
            )
            .to_string(),
            js: r#"console.log("Hello, World!");"#.to_string(),
        }
    }
}
