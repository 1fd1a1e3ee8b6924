//! Render sandbox policy for the embedded preview frame.

use pv_core::ErrorKind;
use pv_core::PreviewError;
use pv_core::PreviewResult;

/// Capability allow-list applied to the preview `<iframe sandbox>`.
///
/// The pasted document cannot widen this; only the host decides it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxPolicy {
    pub allow_downloads: bool,
    pub allow_forms: bool,
    pub allow_modals: bool,
    pub allow_popups: bool,
    pub allow_same_origin: bool,
    pub allow_scripts: bool,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            allow_downloads: true,
            allow_forms: true,
            allow_modals: true,
            allow_popups: true,
            allow_same_origin: true,
            allow_scripts: true,
        }
    }
}

impl SandboxPolicy {
    /// Default allow-list minus `allow-same-origin`, so framed scripts cannot
    /// reach the host page's storage.
    pub fn isolated() -> Self {
        Self {
            allow_same_origin: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> PreviewResult<()> {
        if !self.allow_scripts {
            return Err(PreviewError::new(
                ErrorKind::Config,
                "security.invalid_policy",
                "preview sandbox must allow scripts for pasted documents to run",
            ));
        }

        Ok(())
    }

    /// Space-separated tokens for the `sandbox` attribute.
    pub fn attribute_value(&self) -> String {
        let tokens = [
            (self.allow_downloads, "allow-downloads"),
            (self.allow_forms, "allow-forms"),
            (self.allow_modals, "allow-modals"),
            (self.allow_popups, "allow-popups"),
            (self.allow_same_origin, "allow-same-origin"),
            (self.allow_scripts, "allow-scripts"),
        ];

        tokens
            .iter()
            .filter(|(enabled, _)| *enabled)
            .map(|(_, token)| *token)
            .collect::<Vec<_>>()
            .join(" ")
    }
}
