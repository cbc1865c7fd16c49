//! Document composition: merge a [`SourceBundle`] into one executable page.
//!
//! Purely a text-to-text transformation. The skeleton defines four regions
//! in a fixed order: a style region (CSS verbatim), a body region (HTML
//! verbatim), the instrumentation shim, and a guarded script region
//! wrapping the JS text in a failure boundary. The shim overrides
//! `console.log`/`console.error` (arguments joined with a single space,
//! one outgoing message per call) and installs `window.onerror` so
//! uncaught errors anywhere in the document are reported too.
//!
//! The shim posts through `__sandbox_post` when the embedded engine
//! provides it, and falls back to `parent.postMessage` with the same
//! `{type, message}` shape when the document is loaded in a browser
//! iframe, so one composed document serves both the execution context and
//! the visual preview.

use std::sync::LazyLock;

use minijinja::{AutoEscape, Environment, context};

use crate::bundle::SourceBundle;

const DOCUMENT_TEMPLATE: &str = include_str!("templates/document.html");

static TEMPLATES: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    // Regions are inserted verbatim by contract; the executed document's
    // parser owns recovery from malformed text.
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env.add_template("document", DOCUMENT_TEMPLATE)
        .expect("document template should be valid");
    env
});

/// The single merged, executable document derived from one bundle.
///
/// Immutable and identity-free: regenerated in full on every run request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedDocument(String);

impl ComposedDocument {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Compose a bundle into one self-contained document.
///
/// Deterministic (identical bundles yield byte-identical text) and
/// infallible: the template is fixed, every variable is always supplied,
/// and no validation is performed on the source text.
pub fn compose(bundle: &SourceBundle) -> ComposedDocument {
    let rendered = TEMPLATES
        .get_template("document")
        .expect("document template is registered at init")
        .render(context! {
            html => &bundle.html,
            css => &bundle.css,
            js => &bundle.js,
        })
        .expect("document template renders verbatim text regions");
    ComposedDocument(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composing_twice_is_byte_identical() {
        let bundle = SourceBundle::starter();
        assert_eq!(compose(&bundle).as_str(), compose(&bundle).as_str());
    }

    #[test]
    fn regions_appear_verbatim_and_in_order() {
        let bundle = SourceBundle {
            html: "<p>BODY-REGION</p>".to_string(),
            css: "h1 { color: red; }".to_string(),
            js: "console.log(1);".to_string(),
        };
        let doc = compose(&bundle);
        let text = doc.as_str();

        let css_at = text.find("h1 { color: red; }").expect("css region");
        let html_at = text.find("<p>BODY-REGION</p>").expect("body region");
        let shim_at = text.find("__sandbox_post").expect("instrumentation shim");
        let js_at = text.find("console.log(1);").expect("guarded region");

        assert!(css_at < html_at);
        assert!(html_at < shim_at);
        assert!(shim_at < js_at);
    }

    #[test]
    fn guarded_region_wraps_js_in_failure_boundary() {
        let doc = compose(&SourceBundle {
            js: "boom();".to_string(),
            ..Default::default()
        });
        let text = doc.as_str();
        let try_at = text.find("try {").expect("try opener");
        let js_at = text.find("boom();").expect("js text");
        let catch_at = text.find("} catch (e) {").expect("catch");
        assert!(try_at < js_at && js_at < catch_at);
    }

    #[test]
    fn empty_bundle_composes_to_a_document_skeleton() {
        let doc = compose(&SourceBundle::default());
        assert!(doc.as_str().starts_with("<!DOCTYPE html>"));
        assert!(doc.as_str().contains("</html>"));
    }

    #[test]
    fn user_text_is_not_treated_as_template_syntax() {
        // Template rendering happens once, over the skeleton only; user
        // sources are data.
        let doc = compose(&SourceBundle {
            js: "var s = \"{{ css }}\";".to_string(),
            ..Default::default()
        });
        assert!(doc.as_str().contains("var s = \"{{ css }}\";"));
    }
}
