// SPDX-License-Identifier: GPL-3.0-only

//! Ref/unref history for diagnosing reference leaks
//!
//! Every reference count change on a buffer or frame appends one breadcrumb
//! holding a short tag and, with the `breadcrumbs` feature, the call stack
//! that made the change. Stacks are only captured when backtraces are enabled
//! through `RUST_BACKTRACE` or `RUST_LIB_BACKTRACE`.

use std::sync::{Mutex, PoisonError};

#[cfg(feature = "breadcrumbs")]
use std::backtrace::{Backtrace, BacktraceStatus};

/// Longest tag kept in a breadcrumb, in characters
pub const MAX_TAG_LEN: usize = 31;
/// Stack frames kept per breadcrumb
pub const MAX_STACK_FRAMES: usize = 10;
/// Frames skipped at the top of each captured stack
pub const SKIPPED_STACK_FRAMES: usize = 1;

/// One ref/unref event
pub struct Breadcrumb {
    tag: String,
    #[cfg(feature = "breadcrumbs")]
    backtrace: Backtrace,
}

impl Breadcrumb {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.chars().take(MAX_TAG_LEN).collect(),
            #[cfg(feature = "breadcrumbs")]
            backtrace: Backtrace::capture(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Symbol names of the recorded call stack, outermost last
    ///
    /// Empty when stacks were not captured.
    #[cfg(feature = "breadcrumbs")]
    pub fn stack(&self) -> Vec<String> {
        if self.backtrace.status() != BacktraceStatus::Captured {
            return Vec::new();
        }
        parse_frames(&self.backtrace.to_string())
    }

    #[cfg(not(feature = "breadcrumbs"))]
    pub fn stack(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Extract frame symbols from a formatted backtrace
///
/// Frame lines look like `  3: crate::module::function`, followed by an
/// optional `at file:line` location line.
#[cfg_attr(not(feature = "breadcrumbs"), allow(dead_code))]
fn parse_frames(formatted: &str) -> Vec<String> {
    formatted
        .lines()
        .filter_map(|line| {
            let (index, symbol) = line.trim_start().split_once(": ")?;
            index.parse::<usize>().ok()?;
            Some(symbol.trim().to_string())
        })
        .skip(SKIPPED_STACK_FRAMES)
        .take(MAX_STACK_FRAMES)
        .collect()
}

/// Append-only, mutex-protected breadcrumb log of one object
#[derive(Default)]
pub struct BreadcrumbTrail {
    crumbs: Mutex<Vec<Breadcrumb>>,
}

impl BreadcrumbTrail {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Breadcrumb>> {
        self.crumbs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, tag: &str) {
        let crumb = Breadcrumb::new(tag);
        self.lock().push(crumb);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tags in recording order
    pub fn tags(&self) -> Vec<String> {
        self.lock().iter().map(|c| c.tag.clone()).collect()
    }

    /// Render the trail for a leak report, one breadcrumb per entry
    pub fn render(&self) -> Vec<String> {
        self.lock()
            .iter()
            .enumerate()
            .map(|(i, crumb)| {
                let stack = crumb.stack();
                if stack.is_empty() {
                    format!("#{} {}", i, crumb.tag)
                } else {
                    format!("#{} {}\n    {}", i, crumb.tag, stack.join("\n    "))
                }
            })
            .collect()
    }
}
