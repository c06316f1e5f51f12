//! Static command catalog served by `GET /api/commands`.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Command {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub modes: &'static [&'static str],
}

pub const COMMANDS: &[Command] = &[
    Command {
        id: "analyze",
        name: "analyze repository",
        description: "deep dive into github repositories",
        icon: "🔍",
        modes: &["overview", "security", "patterns", "improvements", "learning"],
    },
    Command {
        id: "compare",
        name: "compare codebases",
        description: "compare two repositories or branches",
        icon: "🔄",
        modes: &["architecture", "dependencies", "patterns", "performance"],
    },
    Command {
        id: "extract",
        name: "extract patterns",
        description: "extract reusable patterns from code",
        icon: "✨",
        modes: &["components", "utilities", "architecture", "testing"],
    },
    Command {
        id: "audit",
        name: "security audit",
        description: "comprehensive security analysis",
        icon: "🔒",
        modes: &["vulnerabilities", "dependencies", "secrets", "compliance"],
    },
    Command {
        id: "document",
        name: "generate docs",
        description: "create beautiful documentation",
        icon: "📚",
        modes: &["api", "architecture", "setup", "contributing"],
    },
    Command {
        id: "vision",
        name: "product vision",
        description: "reimagine your product with AI",
        icon: "🧘",
        modes: &["features", "ux", "architecture", "philosophy"],
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_ids_unique() {
        let mut ids: Vec<&str> = COMMANDS.iter().map(|c| c.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), COMMANDS.len());
    }

    #[test]
    fn test_catalog_serializes_modes() {
        let value = serde_json::to_value(&COMMANDS[0]).unwrap();
        assert_eq!(value["id"], "analyze");
        assert_eq!(value["modes"].as_array().unwrap().len(), 5);
    }
}
