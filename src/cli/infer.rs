//! Infer command handler.

use clap::Args;
use color_eyre::Result;

use crate::di::FromRef;
use crate::services::{InferenceEngine, InferenceOverrides};

use super::{cancel_on_ctrl_c, context, print_json, App};

/// Tag-overlap inference options.
///
/// Thresholds left unset fall back to each shape's configured values.
#[derive(Args, Debug, Clone, Default)]
pub struct InferArgs {
    /// Run only this shape (default: every configured shape)
    #[arg(long)]
    pub shape: Option<String>,

    /// Minimum number of shared tags
    #[arg(long)]
    pub min_score: Option<usize>,

    /// Minimum shared/source tag ratio
    #[arg(long)]
    pub min_confidence: Option<f64>,

    /// Maximum targets kept per source term
    #[arg(long)]
    pub top_k: Option<usize>,

    /// Count candidates without writing
    #[arg(long)]
    pub dry_run: bool,
}

impl InferArgs {
    pub fn overrides(&self) -> InferenceOverrides {
        InferenceOverrides {
            min_score: self.min_score,
            min_confidence: self.min_confidence,
            top_k: self.top_k,
        }
    }
}

impl App {
    pub async fn run_infer(&self, args: &InferArgs) -> Result<()> {
        let ctx = context().await?;
        let engine = InferenceEngine::from_ref(&ctx);
        let report = engine
            .infer_relations(
                args.shape.as_deref(),
                &args.overrides(),
                args.dry_run,
                &cancel_on_ctrl_c(),
            )
            .await?;
        print_json(&report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{App, Command};
    use clap::Parser;

    #[test]
    fn test_infer_flags_become_overrides() {
        let app = App::try_parse_from([
            "qualgraph",
            "infer",
            "--shape",
            "testcase-tool",
            "--min-score",
            "4",
            "--top-k",
            "2",
            "--dry-run",
        ])
        .unwrap();

        let Command::Infer(args) = app.command else {
            panic!("expected infer command");
        };
        assert_eq!(args.shape.as_deref(), Some("testcase-tool"));
        assert!(args.dry_run);
        assert_eq!(
            args.overrides(),
            InferenceOverrides {
                min_score: Some(4),
                min_confidence: None,
                top_k: Some(2),
            }
        );
    }
}
