//! Compiled patterns and replacement texts shared by the sanitization steps

use once_cell::sync::Lazy;
use regex::Regex;

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        pub static $name: Lazy<Regex> =
            Lazy::new(|| Regex::new($re).expect(concat!(stringify!($name), " is a valid regex")));
    };
}

// ============================================================================
// Tools
// ============================================================================

pub const MCP_TOOL_PREFIX: &str = "mcp__";

/// MCP servers whose tools are always retained
pub const MCP_ALLOWED_PREFIXES: &[&str] = &["mcp__semvex__"];

// ============================================================================
// Reminders
// ============================================================================

pub const MALWARE_MARKER: &str = "you should consider whether it would be considered malware";
pub const PLAN_MODE_MARKER: &str = "Plan mode is active";
pub const CLAUDE_MD_MARKER: &str = "# claudeMd";
pub const REMINDER_OPEN: &str = "<system-reminder>";

pattern!(
    MALWARE_REMINDER,
    r"(?s)<system-reminder>\s*Whenever you read a file, you should consider whether it would be considered malware\..*?</system-reminder>\s*"
);

pattern!(
    CLAUDE_MD_REMINDER,
    r"(?s)<system-reminder>\s*As you answer the user's questions, you can use the following context:\s*# claudeMd.*?</system-reminder>\s*"
);

pattern!(TOOL_RESULT_OUTPUT, r"(?s)<output>\n\s*(.*?)\s*\n</output>");
pattern!(TOOL_CALL_LOG, r"(?m)^\[Tool: \w+\] \{.*?\}\n?");
pub const RESULT_SEPARATOR: &str = "--- RESULT ---";

// Trailing model/knowledge-cutoff/gitStatus sections after the env block
pattern!(POST_ENV_INFO, r"(?s)</env>\n.*$");
pattern!(
    POST_ENV_SIGNAL,
    r"(?i)(?:you are powered by the model|gitStatus|knowledge cutoff|claude_background_info)"
);

/// Reminder categories that carry no user instruction
pub const NOISE_REMINDER_MARKERS: &[&str] = &[
    "TodoWrite tool hasn't been used",
    "Plan mode is active",
    "consider whether it would be considered malware",
    "SessionStart:",
    "UserPromptSubmit:",
];

pub const PLAN_MODE_REPLACEMENTS: &[(&str, &str)] = &[
    (
        "In this phase you should only use the Explore subagent type.",
        "In this phase you should use the zai-speckit-plugin:codebase-explorer subagent type. \
         For investigating failures or debugging issues, use zai-speckit-plugin:root-cause-agent instead.",
    ),
    (
        "Launch up to 3 Explore agents IN PARALLEL",
        "Launch up to 3 zai-speckit-plugin:codebase-explorer agents IN PARALLEL",
    ),
    (
        "3. After exploring the code, use the AskUserQuestion tool to clarify ambiguities in the user request up front.",
        "3. After exploring the code, use the AskUserQuestion tool to clarify ambiguities in the user request up front.\n\n\
         **Research agents available:**\n\
         - **zai-speckit-plugin:context7-docs**: Look up library documentation (FastAPI, React, etc.)\n\
         - **zai-speckit-plugin:web-research**: Search for best practices, tutorials, error codes, or API docs not in Context7. \
         Also useful when investigating issues to look up error messages or stack traces.",
    ),
    (
        "Launch Plan agent(s) to design the implementation",
        "Launch zai-speckit-plugin:architect agent(s) to design the implementation",
    ),
    (
        "Launch at least 1 Plan agent for most tasks",
        "Launch at least 1 zai-speckit-plugin:architect agent for most tasks",
    ),
];

// ============================================================================
// System prompt
// ============================================================================

/// Sentinel identifying the main-session system prompt block
pub const SYSTEM_PROMPT_SENTINEL: &str = "You are an interactive CLI tool";

/// Built-in replacement prompt; its `<env></env>` is filled with the client's env block
pub const DEFAULT_SYSTEM_PROMPT: &str = include_str!("../../../prompts/default_system.md");

// ============================================================================
// Task tool
// ============================================================================

pub const TASK_TOOL: &str = "Task";

pattern!(
    TASK_OPENING,
    r"Launch a new agent to handle complex, multi-step tasks autonomously\. \n\nThe Task tool launches specialized agents \(subprocesses\) that autonomously handle complex tasks\. Each agent type has specific capabilities and tools available to it\."
);

pub const NEW_TASK_OPENING: &str = "Delegate work to agents that run in isolation. \
Preserves main session context while agents handle focused tasks.\n\n\
**How to use effectively:**\n\
- Give focused, precise, scoped task per agent - broad tasks lead to incomplete work\n\
- Agents start fresh with no prior context - provide everything they need:\n  \
- File paths to read (specs, docs, code to reference/modify)\n  \
- Exact commands if they need to run builds, tests, docker, pre-commit hooks\n  \
- Write a context file (e.g., /tmp/task-context.md) and pass its path if context is complex\n\
- Don't paste file contents in the prompt - give paths and let agents read them\n\
- If unsure about command structure, verify it in main session first, then pass exact commands to agent\n\n\
**Pass file paths, not descriptions:**\n\
- Files to modify: `src/api/users.py, src/models/user.py`\n\
- Reference code: `src/utils/auth.py (see token handling)`\n\
- Previous agent outputs: `/tmp/zai-speckit/toon/abc123.toon, /tmp/zai-speckit/toon/def456.toon`\n\
- Plan file: `/tmp/plan.md (task 3)`\n\
- Specs/config: `docs/api-spec.md, pyproject.toml`";

pattern!(
    TASK_CONTEXT_SECTION,
    r#"(?s)- Agents with "access to current context".*?understand the context\.\n"#
);
pattern!(TASK_EXAMPLE_SECTION, r"(?s)\n*Example usage:.*$");
pattern!(AGENT_TOOLS_SUFFIX, r" \(Tools: [^)]+\)");

pattern!(
    BASH_AGENT_DESC,
    r"- Bash: Command execution specialist for running bash commands\. Use this for git operations, command execution, and other terminal tasks\."
);
pub const BASH_AGENT_NEW_DESC: &str = "- Bash: Git and system commands ONLY. \
Use for: git operations, docker, npm/pip install, running tests/builds. \
NEVER for: reading files, searching code, exploring codebase (use codebase-explorer instead).";

/// Pattern removing one agent entry ("- Name: ... (Tools: ...)\n") from the Task description
pub fn agent_entry_pattern(agent: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(r"(?s)- {}:.*?\(Tools:.*?\)\n", regex::escape(agent)))
}

// ============================================================================
// Tool descriptions
// ============================================================================

pub const GREP_PRIORITY_PREFIX: &str = r#"⚠️ STOP: Before using Grep, consider if a better tool exists:

- "Find callers of X" → Use mcp__semvex__find_callers_tool (Grep matches strings, not calls)
- "What does X call" → Use mcp__semvex__find_callees_tool
- "Trace path from A to B" → Use mcp__semvex__get_call_chain_tool
- "Find code related to concept" → Use mcp__semvex__search_code_tool

Grep is ONLY appropriate for:
- Exact literal strings (error messages, specific constants)
- Config values or environment variables
- Comments containing specific text

DO NOT use Grep to verify MCP tool results - MCP tools are authoritative for call relationships.

"#;

pattern!(GREP_ALWAYS_DIRECTIVE, r"(?m)^\s*-\s*ALWAYS use Grep for search tasks\..*?$");

pub const GLOB_PRIORITY_PREFIX: &str = r#"For understanding code or finding relevant implementations, prefer semantic search (mcp__semvex__search_code_tool) or Task tool with codebase-explorer agent first.

Use Glob for:
- Finding files by name pattern (e.g., "**/*.test.ts")
- Listing files in a directory structure

"#;

pattern!(
    EDIT_READ_RULE,
    r"You must use your `Read` tool at least once in the conversation before editing\. This tool will error if you attempt an edit without reading the file\.\s*"
);

pub const EDIT_READ_REPLACEMENT: &str = "Before editing, you need context about the file. This can come from:
- Semantic search results (mcp__semvex__search_code_tool) that include the lines you're editing
- The Read tool for broader file context
Consider reading additional parts of the file if semantic search only showed a small snippet.
Note: A minimal Read (limit=1) satisfies the file access requirement, then use semantic search context for the actual edit.
";

pattern!(
    WRITE_READ_RULE,
    r"If this is an existing file, you MUST use the Read tool first to read the file's contents\. This tool will fail if you did not read the file first\.\s*"
);

pub const WRITE_READ_REPLACEMENT: &str = "If this is an existing file, you need context about its contents first. This can come from:
- Semantic search results (mcp__semvex__search_code_tool) showing the file's content
- The Read tool for the full file
For existing files, prefer Edit over Write unless rewriting the entire file.
Note: A minimal Read (limit=1) satisfies the file access requirement, then use semantic search context for understanding.
";

pub const MINIMAL_BASH_DESCRIPTION: &str = r#"Executes a bash command with optional timeout.

Avoid using Bash for code search — use the Grep tool (for grep, rg) or Glob tool (for find, fd) instead.
Bash is appropriate for: builds, tests, git, package management, data processing (jq, awk), and piping command output.

Parameters:
- command (required): The command to execute
- timeout (optional): Timeout in milliseconds (max 600000, default 120000)
- description (optional): Short description of what command does

Notes:
- Quote paths with spaces: cd "/path/with spaces"
- Chain commands with && for sequential execution
- Use absolute paths when possible
- Prefer specialized tools: Read (not cat), Edit (not sed)
- NEVER run destructive git commands (push --force, reset --hard) without explicit user request
"#;

pub const BASH_BACKGROUND_SUFFIX: &str = "
- run_in_background (optional): Set true to run in background. Use TaskOutput to read output later.
";

pub const MINIMAL_DESCRIPTION_PARAM: &str = "Short description of what command does";
