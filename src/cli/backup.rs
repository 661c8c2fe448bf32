//! Экспорт и импорт резервной копии серверов

use std::fs;
use std::path::Path;

use colored::Colorize;
use secrecy::ExposeSecret;

use crate::api::Backend;
use crate::error::Result;

use super::{prompt_new_password, prompt_password};

/// Минимальная длина пароля резервной копии
const MIN_BACKUP_PASSWORD_LEN: usize = 8;

pub fn export(backend: &Backend, file: &Path) -> Result<()> {
    println!("{}", "=== Экспорт серверов ===".cyan().bold());
    println!();

    let count = backend.get_servers().len();
    let password = prompt_new_password("Пароль резервной копии", MIN_BACKUP_PASSWORD_LEN)?;

    let blob = backend.export_servers(password.expose_secret().as_bytes())?;
    fs::write(file, blob)?;

    println!();
    println!(
        "{} Экспортировано серверов: {} -> {}",
        "Успех:".green().bold(),
        count,
        file.display()
    );
    Ok(())
}

pub fn import(backend: &Backend, file: &Path) -> Result<()> {
    println!("{}", "=== Импорт серверов ===".cyan().bold());
    println!();

    let blob = fs::read_to_string(file)?;
    let password = prompt_password("Пароль резервной копии: ")?;

    let count = backend.import_servers(blob.trim(), password.expose_secret().as_bytes())?;

    println!();
    println!("{} Импортировано серверов: {}", "Успех:".green().bold(), count);
    Ok(())
}
