//! Файловые операции по SFTP

use std::path::{Path, PathBuf};

use chrono::DateTime;
use clap::Subcommand;
use colored::Colorize;

use crate::api::Backend;
use crate::error::Result;
use crate::ssh::DirectoryEntry;

#[derive(Subcommand)]
pub enum SftpAction {
    /// Показать содержимое каталога
    Ls {
        /// Удалённый путь (по умолчанию домашний каталог)
        path: Option<String>,
    },
    /// Вывести файл в stdout
    Cat { path: String },
    /// Скачать файл
    Get {
        remote: String,
        /// Локальный путь (по умолчанию имя удалённого файла)
        local: Option<PathBuf>,
    },
    /// Загрузить файл
    Put {
        local: PathBuf,
        /// Удалённый путь (по умолчанию имя локального файла в домашнем каталоге)
        remote: Option<String>,
    },
    /// Создать каталог
    Mkdir { path: String },
    /// Создать пустой файл
    Touch { path: String },
    /// Удалить файл или каталог
    Rm {
        path: String,
        /// Удалить каталог
        #[arg(short, long)]
        dir: bool,
    },
    /// Переименовать или переместить
    Mv { from: String, to: String },
}

pub fn run(backend: &Backend, server: &str, action: SftpAction) -> Result<()> {
    let profile = backend.find_server(server)?;

    let runtime = super::runtime()?;
    runtime.block_on(async {
        let session_id = backend.sftp_connect(&profile.id).await?;
        let result = perform(backend, &session_id, action).await;
        backend.shutdown().await;
        result
    })
}

async fn perform(backend: &Backend, session: &str, action: SftpAction) -> Result<()> {
    match action {
        SftpAction::Ls { path } => {
            let path = match path {
                Some(p) => p,
                None => backend.sftp_home_dir(session).await?,
            };
            for entry in backend.sftp_list_dir(session, &path).await? {
                print_entry(&entry);
            }
        }
        SftpAction::Cat { path } => {
            let contents = backend.sftp_read_file(session, &path).await?;
            use std::io::Write;
            std::io::stdout().write_all(&contents)?;
        }
        SftpAction::Get { remote, local } => {
            let local = local.unwrap_or_else(|| PathBuf::from(file_name(&remote)));
            let bytes = backend.sftp_download(session, &remote, &local).await?;
            println!(
                "{} {} -> {} ({} байт)",
                "Скачано:".green().bold(),
                remote,
                local.display(),
                bytes
            );
        }
        SftpAction::Put { local, remote } => {
            let remote = match remote {
                Some(r) => r,
                None => {
                    let home = backend.sftp_home_dir(session).await?;
                    format!("{}/{}", home.trim_end_matches('/'), local_name(&local))
                }
            };
            let bytes = backend.sftp_upload(session, &local, &remote).await?;
            println!(
                "{} {} -> {} ({} байт)",
                "Загружено:".green().bold(),
                local.display(),
                remote,
                bytes
            );
        }
        SftpAction::Mkdir { path } => {
            backend.sftp_create_dir(session, &path).await?;
            println!("{} {}", "Создан каталог:".green().bold(), path);
        }
        SftpAction::Touch { path } => {
            backend.sftp_create_file(session, &path).await?;
            println!("{} {}", "Создан файл:".green().bold(), path);
        }
        SftpAction::Rm { path, dir } => {
            backend.sftp_delete(session, &path, dir).await?;
            println!("{} {}", "Удалено:".green().bold(), path);
        }
        SftpAction::Mv { from, to } => {
            backend.sftp_rename(session, &from, &to).await?;
            println!("{} {} -> {}", "Перемещено:".green().bold(), from, to);
        }
    }
    Ok(())
}

fn print_entry(entry: &DirectoryEntry) {
    let modified = entry
        .modified
        .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    let name = if entry.is_dir {
        entry.name.blue().bold().to_string()
    } else {
        entry.name.clone()
    };

    println!(
        "{} {:>12} {:<16} {}",
        entry.permissions.dimmed(),
        entry.size,
        modified,
        name
    );
}

/// Последний компонент удалённого пути
fn file_name(remote: &str) -> &str {
    remote
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .unwrap_or("download")
}

fn local_name(local: &Path) -> String {
    local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string())
}
