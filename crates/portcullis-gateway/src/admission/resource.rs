//! Path → resource mapping.
//!
//! An ordered table of compiled patterns, matched first-hit-wins. Paths
//! that match no rule carry no resource and skip the authorization step.
//! Patterns are segment-wise: `*` matches exactly one segment, a trailing
//! `name*` matches any segment starting with `name`, and a pattern is a
//! prefix — the request path may continue past it.

use crate::principal::AccessLevel;

/// What a path demands from the authorization service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub resource_type: &'static str,
    pub resource_name: &'static str,
    pub required_level: AccessLevel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(&'static str),
    /// Any single segment.
    Any,
    /// A segment beginning with the given prefix.
    Prefix(&'static str),
}

impl Segment {
    fn matches(&self, segment: &str) -> bool {
        match self {
            Segment::Literal(lit) => *lit == segment,
            Segment::Any => true,
            Segment::Prefix(prefix) => segment.starts_with(prefix),
        }
    }
}

struct Rule {
    pattern: Vec<Segment>,
    descriptor: ResourceDescriptor,
}

/// Compiled, ordered resource rules.
pub struct ResourceTable {
    rules: Vec<Rule>,
}

impl ResourceTable {
    /// The platform's standard mapping.
    pub fn standard() -> Self {
        use AccessLevel::{ReadOnly, ReadWrite};
        let rules = vec![
            rule(
                "/api/v1/blockchain/*/balance/*",
                "api_endpoint",
                "blockchain_balance_check",
                ReadOnly,
            ),
            rule(
                "/api/v1/blockchain/*/transaction*",
                "api_endpoint",
                "blockchain_transaction",
                ReadOnly,
            ),
            rule(
                "/api/v1/blockchain/*/status*",
                "api_endpoint",
                "blockchain_status",
                ReadOnly,
            ),
            rule(
                "/api/v1/blockchain/*",
                "api_endpoint",
                "blockchain_general",
                ReadOnly,
            ),
            rule(
                "/api/v1/agents/*/api/chat*",
                "api_endpoint",
                "agent_chat",
                ReadWrite,
            ),
            rule("/api/v1/agents/*", "api_endpoint", "agent_chat", ReadOnly),
            rule(
                "/api/v1/mcp/*/tools/call*",
                "mcp_tool",
                "tool_execution",
                ReadWrite,
            ),
            rule("/api/v1/mcp/*/search*", "mcp_tool", "search", ReadOnly),
            rule(
                "/api/v1/mcp/*/prompts/get*",
                "mcp_tool",
                "prompt_access",
                ReadOnly,
            ),
            rule("/api/v1/mcp/*", "mcp_tool", "mcp_general", ReadOnly),
            rule(
                "/api/v1/gateway/*",
                "api_endpoint",
                "gateway_management",
                ReadOnly,
            ),
        ];
        Self { rules }
    }

    /// First rule matching the path, if any.
    pub fn match_path(&self, path: &str) -> Option<ResourceDescriptor> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        self.rules
            .iter()
            .find(|rule| matches(&rule.pattern, &segments))
            .map(|rule| rule.descriptor)
    }
}

fn matches(pattern: &[Segment], segments: &[&str]) -> bool {
    if segments.len() < pattern.len() {
        return false;
    }
    pattern
        .iter()
        .zip(segments)
        .all(|(pat, seg)| pat.matches(seg))
}

fn rule(
    pattern: &'static str,
    resource_type: &'static str,
    resource_name: &'static str,
    required_level: AccessLevel,
) -> Rule {
    let compiled = pattern
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|seg| {
            if seg == "*" {
                Segment::Any
            } else if let Some(prefix) = seg.strip_suffix('*') {
                Segment::Prefix(prefix)
            } else {
                Segment::Literal(seg)
            }
        })
        .collect();
    Rule {
        pattern: compiled,
        descriptor: ResourceDescriptor {
            resource_type,
            resource_name,
            required_level,
        },
    }
}
