//! Shared icons for terminal output.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!]");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "[i]");

// Run indicators
pub static PLAN: Emoji<'_, '_> = Emoji("📋 ", "[PLAN]");
pub static GATE: Emoji<'_, '_> = Emoji("🚦 ", "[GATE]");
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static FILE_NEW: Emoji<'_, '_> = Emoji("📄 ", "+");
pub static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
