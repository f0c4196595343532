//! Shell completion generation and installation.

use std::io::Write;
use std::path::PathBuf;

use clap::{CommandFactory, ValueEnum};
use clap_complete::{generate, Shell};

/// Supported shells for completion generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

impl From<CompletionShell> for Shell {
    fn from(shell: CompletionShell) -> Self {
        match shell {
            CompletionShell::Bash => Shell::Bash,
            CompletionShell::Zsh => Shell::Zsh,
            CompletionShell::Fish => Shell::Fish,
            CompletionShell::PowerShell => Shell::PowerShell,
            CompletionShell::Elvish => Shell::Elvish,
        }
    }
}

pub fn generate_completions<C: CommandFactory>(
    shell: CompletionShell,
    bin_name: &str,
    out: &mut dyn Write,
) {
    let mut cmd = C::command();
    let shell_type: Shell = shell.into();
    generate(shell_type, &mut cmd, bin_name, out);
}

/// Where the shell picks up completion files without rc edits, if anywhere.
pub fn completions_dir(shell: CompletionShell) -> Option<PathBuf> {
    match shell {
        CompletionShell::Bash => Some(PathBuf::from("/etc/bash_completion.d")),
        CompletionShell::Zsh => Some(PathBuf::from("/usr/local/share/zsh/site-functions")),
        CompletionShell::Fish => {
            dirs::config_dir().map(|d| d.join("fish").join("completions"))
        }
        CompletionShell::PowerShell | CompletionShell::Elvish => None,
    }
}

pub fn completion_filename(shell: CompletionShell, bin_name: &str) -> String {
    match shell {
        CompletionShell::Bash => bin_name.to_string(),
        CompletionShell::Zsh => format!("_{}", bin_name),
        CompletionShell::Fish => format!("{}.fish", bin_name),
        CompletionShell::PowerShell => format!("_{}.ps1", bin_name),
        CompletionShell::Elvish => format!("{}.elv", bin_name),
    }
}

/// Writes the completion script into the shell's completion directory.
pub fn install_completions<C: CommandFactory>(
    shell: CompletionShell,
    bin_name: &str,
) -> anyhow::Result<PathBuf> {
    let dir = completions_dir(shell).ok_or_else(|| {
        anyhow::anyhow!("No system completion directory for {:?}; redirect `completions` output instead", shell)
    })?;
    std::fs::create_dir_all(&dir)?;

    let path = dir.join(completion_filename(shell, bin_name));
    let mut file = std::fs::File::create(&path)?;
    generate_completions::<C>(shell, bin_name, &mut file);
    tracing::trace!(path = %path.display(), "Installed completions");
    Ok(path)
}

pub fn detect_shell() -> Option<CompletionShell> {
    std::env::var("SHELL").ok().and_then(|s| shell_from_path(&s))
}

fn shell_from_path(s: &str) -> Option<CompletionShell> {
    if s.contains("zsh") {
        Some(CompletionShell::Zsh)
    } else if s.contains("bash") {
        Some(CompletionShell::Bash)
    } else if s.contains("fish") {
        Some(CompletionShell::Fish)
    } else if s.contains("pwsh") || s.contains("powershell") {
        Some(CompletionShell::PowerShell)
    } else if s.contains("elvish") {
        Some(CompletionShell::Elvish)
    } else {
        None
    }
}
