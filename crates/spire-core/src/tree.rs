//! Per-method routing trie.
//!
//! A [`Tree`] owns a root [`Node`]; every `/`-separated segment of a
//! registered pattern becomes one level of the trie. Three kinds of segment
//! exist:
//!
//! | Syntax   | Kind      | Matches                                     |
//! |----------|-----------|---------------------------------------------|
//! | `user`   | literal   | exactly `user` (case-sensitive)             |
//! | `:id`    | parameter | any single segment, bound as `id`           |
//! | `*rest`  | wildcard  | one or more trailing segments, bound `rest` |
//!
//! Lookup tries the literal child first, then the parameter child, then the
//! wildcard child, backtracking when a branch dead-ends. Literal routes
//! therefore always win over parameter routes at the same depth regardless
//! of registration order.
//!
//! ```text
//! root
//!  └── user
//!       ├── list          (GET /user/list)
//!       └── :id           (GET /user/:id)
//!            └── post
//!                 └── :postId  (GET /user/:id/post/:postId)
//! ```
//!
//! Trees are built during setup and only read afterwards, so lookups take
//! no locks.

use std::collections::HashMap;

use crate::error::{RouteError, RouteResult};

/// Parameters extracted from a request path, keyed by binding name.
pub type Params = HashMap<String, String>;

/// Iterates over the non-empty segments of a path or pattern.
pub(crate) fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SegmentKind {
    Literal,
    Param(String),
    Wildcard(Option<String>),
}

impl SegmentKind {
    fn parse(pattern: &str, raw: &str) -> RouteResult<Self> {
        let invalid = || RouteError::InvalidSegment {
            pattern: pattern.to_string(),
            segment: raw.to_string(),
        };
        let has_marker = |name: &str| name.contains([':', '*']);

        if let Some(name) = raw.strip_prefix(':') {
            if name.is_empty() || has_marker(name) {
                return Err(invalid());
            }
            Ok(Self::Param(name.to_string()))
        } else if let Some(name) = raw.strip_prefix('*') {
            if has_marker(name) {
                return Err(invalid());
            }
            Ok(Self::Wildcard((!name.is_empty()).then(|| name.to_string())))
        } else {
            Ok(Self::Literal)
        }
    }
}

// =============================================================================
// Node
// =============================================================================

/// A single segment of the routing trie.
///
/// A node is terminal exactly when it holds a non-empty handler chain.
#[derive(Debug)]
pub struct Node<H> {
    segment: String,
    kind: SegmentKind,
    literals: HashMap<String, Node<H>>,
    param: Option<Box<Node<H>>>,
    wildcard: Option<Box<Node<H>>>,
    handlers: Vec<H>,
    pattern: Option<String>,
}

impl<H> Node<H> {
    fn new(segment: &str, kind: SegmentKind) -> Self {
        Self {
            segment: segment.to_string(),
            kind,
            literals: HashMap::new(),
            param: None,
            wildcard: None,
            handlers: Vec::new(),
            pattern: None,
        }
    }

    fn root() -> Self {
        Self::new("", SegmentKind::Literal)
    }

    /// The literal or pattern text of this level.
    pub fn segment(&self) -> &str {
        &self.segment
    }

    /// The handler chain stored at this node (empty unless terminal).
    pub fn handlers(&self) -> &[H] {
        &self.handlers
    }

    /// Returns `true` when a complete registered route ends here.
    pub fn is_last(&self) -> bool {
        !self.handlers.is_empty()
    }

    /// Returns `true` if this segment binds a path variable.
    pub fn is_param(&self) -> bool {
        matches!(self.kind, SegmentKind::Param(_))
    }

    /// Returns `true` if this segment is a trailing catch-all.
    pub fn is_wildcard(&self) -> bool {
        matches!(self.kind, SegmentKind::Wildcard(_))
    }

    /// The binding name of a parameter or named wildcard segment.
    pub fn param_name(&self) -> Option<&str> {
        match &self.kind {
            SegmentKind::Param(name) => Some(name),
            SegmentKind::Wildcard(name) => name.as_deref(),
            SegmentKind::Literal => None,
        }
    }

    /// The full pattern registered at this node, if terminal.
    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    fn child_mut(
        &mut self,
        pattern: &str,
        raw: &str,
        kind: SegmentKind,
    ) -> RouteResult<&mut Node<H>> {
        match kind {
            SegmentKind::Literal => Ok(self
                .literals
                .entry(raw.to_string())
                .or_insert_with(|| Node::new(raw, SegmentKind::Literal))),
            SegmentKind::Param(_) => Self::exclusive_slot(&mut self.param, pattern, raw, kind),
            SegmentKind::Wildcard(_) => {
                Self::exclusive_slot(&mut self.wildcard, pattern, raw, kind)
            }
        }
    }

    /// Only one parameter child and one wildcard child may exist per node;
    /// a second one with a different binding would make lookup ambiguous.
    fn exclusive_slot<'a>(
        slot: &'a mut Option<Box<Node<H>>>,
        pattern: &str,
        raw: &str,
        kind: SegmentKind,
    ) -> RouteResult<&'a mut Node<H>> {
        if let Some(existing) = slot.as_deref() {
            if existing.kind != kind {
                return Err(RouteError::AmbiguousParam {
                    pattern: pattern.to_string(),
                    segment: raw.to_string(),
                    existing: existing.segment.clone(),
                });
            }
        }
        Ok(slot.get_or_insert_with(|| Box::new(Node::new(raw, kind))))
    }

    /// Depth-first lookup: literal, then parameter, then wildcard.
    ///
    /// On success `captures` holds one entry per binding traversed; on
    /// failure it is left as it was found.
    fn walk<'n>(
        &'n self,
        segments: &[&str],
        captures: &mut Vec<(&'n str, String)>,
    ) -> Option<&'n Node<H>> {
        let Some((first, rest)) = segments.split_first() else {
            return self.is_last().then_some(self);
        };

        if let Some(found) = self
            .literals
            .get(*first)
            .and_then(|child| child.walk(rest, captures))
        {
            return Some(found);
        }

        if let Some(child) = self.param.as_deref() {
            let mark = captures.len();
            if let SegmentKind::Param(name) = &child.kind {
                captures.push((name.as_str(), (*first).to_string()));
            }
            if let Some(found) = child.walk(rest, captures) {
                return Some(found);
            }
            captures.truncate(mark);
        }

        if let Some(child) = self.wildcard.as_deref().filter(|child| child.is_last()) {
            if let SegmentKind::Wildcard(Some(name)) = &child.kind {
                captures.push((name.as_str(), segments.join("/")));
            }
            return Some(child);
        }

        None
    }

    fn collect_patterns<'n>(&'n self, out: &mut Vec<&'n str>) {
        if let Some(pattern) = self.pattern.as_deref() {
            out.push(pattern);
        }
        for child in self.literals.values() {
            child.collect_patterns(out);
        }
        for child in self.param.iter().chain(self.wildcard.iter()) {
            child.collect_patterns(out);
        }
    }
}

// =============================================================================
// Tree
// =============================================================================

/// The result of a successful lookup.
#[derive(Debug)]
pub struct RouteMatch<'n, H> {
    /// The terminal node reached.
    pub node: &'n Node<H>,
    /// Bindings observed along the way.
    pub params: Params,
}

/// A routing trie for one HTTP method.
#[derive(Debug)]
pub struct Tree<H> {
    root: Node<H>,
}

impl<H> Default for Tree<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Tree<H> {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self { root: Node::root() }
    }

    /// Registers `handlers` under `pattern`.
    ///
    /// # Errors
    ///
    /// - [`RouteError::EmptyChain`] when `handlers` is empty.
    /// - [`RouteError::InvalidSegment`] / [`RouteError::WildcardNotLast`] for
    ///   malformed patterns.
    /// - [`RouteError::AmbiguousParam`] when another parameter or wildcard
    ///   with a different name already occupies the same position.
    /// - [`RouteError::DuplicateRoute`] when the route already exists.
    pub fn add_router(&mut self, pattern: &str, handlers: Vec<H>) -> RouteResult<()> {
        if handlers.is_empty() {
            return Err(RouteError::EmptyChain {
                pattern: pattern.to_string(),
            });
        }

        let segments = split_path(pattern)
            .map(|raw| SegmentKind::parse(pattern, raw).map(|kind| (raw, kind)))
            .collect::<RouteResult<Vec<_>>>()?;

        let last = segments.len().saturating_sub(1);
        if segments
            .iter()
            .enumerate()
            .any(|(i, (_, kind))| matches!(kind, SegmentKind::Wildcard(_)) && i != last)
        {
            return Err(RouteError::WildcardNotLast {
                pattern: pattern.to_string(),
            });
        }

        let mut node = &mut self.root;
        for (raw, kind) in segments {
            node = node.child_mut(pattern, raw, kind)?;
        }

        if node.is_last() {
            return Err(RouteError::DuplicateRoute {
                pattern: pattern.to_string(),
            });
        }
        node.handlers = handlers;
        node.pattern = Some(pattern.to_string());
        Ok(())
    }

    /// Resolves `path` to its terminal node together with its bindings.
    pub fn find(&self, path: &str) -> Option<RouteMatch<'_, H>> {
        let segments: Vec<&str> = split_path(path).collect();
        let mut captures = Vec::new();
        let node = self.root.walk(&segments, &mut captures)?;
        let params = captures
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        Some(RouteMatch { node, params })
    }

    /// Resolves `path` to the terminal node of a registered route.
    pub fn match_node(&self, path: &str) -> Option<&Node<H>> {
        self.find(path).map(|found| found.node)
    }

    /// Re-walks `path` and returns the value observed at every binding.
    ///
    /// Intended to follow a successful [`match_node`](Self::match_node) on the
    /// same path; an unmatched path yields an empty map.
    pub fn parse_params_from_end_node(&self, path: &str) -> Params {
        self.find(path).map(|found| found.params).unwrap_or_default()
    }

    /// Lists every registered pattern, sorted.
    pub fn routes(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.root.collect_patterns(&mut out);
        out.sort_unstable();
        out
    }
}
