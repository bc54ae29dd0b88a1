//! Source-to-source rewriting that makes untrusted code steppable.
//!
//! Every line that starts a statement gets a step announcement prepended and a
//! snapshot call inserted where the statement ends. In manual mode a
//! suspension point follows each snapshot call. Insertions never add line
//! breaks, so body line `n` of the compiled program is source line `n`.

mod lexer;
mod prelude;
mod scan;

pub use lexer::is_identifier;
pub use scan::{Placement, StatementSite};

use crate::config::SnapshotOptions;
use crate::error::InstrumentError;
use lexer::Lexer;
use serde_json::json;
use stepbox_common::ExecutionMode;

/// Self-contained program produced by the [`Instrumenter`]
#[derive(Debug, Clone)]
pub struct InstrumentedProgram {
    /// Compiled program text: header, rewritten body, footer
    pub source: String,
    pub entry_point: String,
    /// Names captured by every snapshot, in capture order
    pub names: Vec<String>,
    pub mode: ExecutionMode,
    /// Per-run token naming the hooks object and tagging the result envelope
    pub nonce: String,
    pub line_map: LineMap,
    /// Number of instrumented statement lines
    pub statement_count: usize,
}

/// Maps compiled program lines back to submitted source lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineMap {
    header_lines: u32,
    body_lines: u32,
}

impl LineMap {
    /// Source line for a compiled line, or `None` for header/footer lines
    pub fn original_line(&self, compiled_line: u32) -> Option<u32> {
        compiled_line
            .checked_sub(self.header_lines)
            .filter(|line| (1..=self.body_lines).contains(line))
    }

    pub fn header_lines(&self) -> u32 {
        self.header_lines
    }
}

/// Rewrites source text into an [`InstrumentedProgram`]
#[derive(Debug, Clone, Default)]
pub struct Instrumenter {
    options: SnapshotOptions,
}

struct Insertion {
    offset: usize,
    /// Snapshot suffixes sort before step prefixes at the same offset
    order: u8,
    text: String,
}

impl Instrumenter {
    pub fn new(options: SnapshotOptions) -> Self {
        Self { options }
    }

    pub fn instrument(
        &self,
        source: &str,
        entry_point: &str,
        mode: ExecutionMode,
    ) -> Result<InstrumentedProgram, InstrumentError> {
        if !is_identifier(entry_point) {
            return Err(InstrumentError::InvalidEntryPoint(entry_point.to_string()));
        }

        let tokens = Lexer::new(source).tokenize()?;
        let sites = scan::statement_sites(&tokens);
        let mut names = scan::entry_parameters(&tokens, entry_point);
        for name in scan::declared_names(&tokens) {
            if !names.contains(&name) {
                names.push(name);
            }
        }

        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let hooks = hooks_name(&nonce);
        let thunks = format!(
            "[{}]",
            names
                .iter()
                .map(|name| format!("() => {name}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let capture = |line: u32| {
            let mut text = format!("{hooks}.snap({line}, {thunks});");
            if mode == ExecutionMode::Manual {
                text.push_str(&format!("{hooks}.pause({line});"));
            }
            text
        };

        let mut insertions = Vec::with_capacity(sites.len() * 2);
        for site in &sites {
            let mut prefix = format!(";{hooks}.step({});", site.line);
            match site.placement {
                Placement::BeforeStatement => prefix.push_str(&capture(site.line)),
                Placement::After(offset) => insertions.push(Insertion {
                    offset,
                    order: 0,
                    text: format!(";{}", capture(site.line)),
                }),
                Placement::Skip => {}
            }
            insertions.push(Insertion {
                offset: site.offset,
                order: 1,
                text: prefix,
            });
        }
        insertions.sort_by_key(|insertion| (insertion.offset, insertion.order));

        let mut body = String::with_capacity(source.len() + insertions.len() * 48);
        let mut cursor = 0;
        for insertion in &insertions {
            body.push_str(&source[cursor..insertion.offset]);
            body.push_str(&insertion.text);
            cursor = insertion.offset;
        }
        body.push_str(&source[cursor..]);

        let limits = json!({
            "depth": self.options.depth + 1,
            "entries": self.options.max_entries,
            "chars": self.options.max_string_len,
            "resultDepth": self.options.result_depth,
            "resultEntries": self.options.result_max_entries,
        });
        let header = prelude::PROGRAM_HEADER
            .replace("__SBX_HOOKS__", &hooks)
            .replace("__SBX_NONCE__", &json!(nonce).to_string())
            .replace("__SBX_NAMES__", &json!(names).to_string())
            .replace("__SBX_LIMITS__", &limits.to_string());
        let footer = prelude::PROGRAM_FOOTER
            .replace("__SBX_HOOKS__", &hooks)
            .replace("__SBX_ENTRY_NAME__", &json!(entry_point).to_string())
            .replace("__SBX_ENTRY__", entry_point);

        let body_lines = source.matches('\n').count() as u32 + 1;
        tracing::debug!(
            entry_point,
            statements = sites.len(),
            names = names.len(),
            "instrumented source"
        );

        Ok(InstrumentedProgram {
            source: format!("{header}{body}{footer}"),
            entry_point: entry_point.to_string(),
            names,
            mode,
            nonce,
            line_map: LineMap {
                header_lines: prelude::header_lines(),
                body_lines,
            },
            statement_count: sites.len(),
        })
    }
}

/// Binding the instrumented body calls its hooks through
pub fn hooks_name(nonce: &str) -> String {
    format!("__sbx_{nonce}")
}
