//! Реализация CLI команд

pub mod backup;
pub mod change_pass;
pub mod connect;
pub mod server;
pub mod sftp;

use std::io::{self, Write};

use colored::Colorize;
use secrecy::{ExposeSecret, SecretString};

use crate::api::Backend;
use crate::config::Settings;
use crate::error::{Error, Result};

/// Минимальная длина мастер-пароля
pub const MIN_PASSWORD_LEN: usize = 12;

/// Запросить новый пароль с подтверждением
pub fn prompt_new_password(title: &str, min_len: usize) -> Result<SecretString> {
    println!("{}", title.cyan().bold());
    if min_len > 0 {
        println!("Минимальная длина: {} символов\n", min_len);
    }

    loop {
        let password = SecretString::new(rpassword::prompt_password("Введите пароль: ")?);

        if password.expose_secret().chars().count() < min_len {
            println!(
                "{} Пароль должен содержать минимум {} символов",
                "Ошибка:".red(),
                min_len
            );
            continue;
        }

        let confirm = SecretString::new(rpassword::prompt_password("Подтвердите пароль: ")?);

        if password.expose_secret() != confirm.expose_secret() {
            println!("{} Пароли не совпадают", "Ошибка:".red());
            continue;
        }

        return Ok(password);
    }
}

/// Запросить существующий пароль
pub fn prompt_password(prompt: &str) -> Result<SecretString> {
    Ok(SecretString::new(rpassword::prompt_password(prompt)?))
}

/// Открыть хранилище, запросив мастер-пароль.
/// При первом запуске хранилище создаётся с новым паролем.
pub fn unlock(settings: Settings) -> Result<Backend> {
    let password = if settings.store_path().exists() {
        prompt_password("Введите мастер-пароль: ")?
    } else {
        println!("Хранилище не найдено, будет создано новое: {}", settings.store_path().display());
        prompt_new_password("Создание мастер-пароля", MIN_PASSWORD_LEN)?
    };

    print!("{}", "Расшифровка хранилища... ".cyan());
    io::stdout().flush()?;

    match Backend::open(settings, password.expose_secret().as_bytes()) {
        Ok(backend) => {
            println!("{}", "готово".green());
            Ok(backend)
        }
        Err(e) => {
            println!("{}", "ошибка".red());
            Err(e)
        }
    }
}

/// Запросить строку; пустой ввод даёт `default`
pub fn prompt(label: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(d) => print!("{} [{}]: ", label, d),
        None => print!("{}: ", label),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    Ok(match (input.is_empty(), default) {
        (true, Some(d)) => d.to_string(),
        _ => input.to_string(),
    })
}

/// Запросить обязательную строку
pub fn prompt_required(label: &str) -> Result<String> {
    loop {
        let value = prompt(label, None)?;
        if !value.is_empty() {
            return Ok(value);
        }
        println!("{} Значение обязательно", "Ошибка:".red());
    }
}

/// Запросить номер порта
pub fn prompt_port(label: &str, default: u16) -> Result<u16> {
    let value = prompt(label, Some(&default.to_string()))?;
    value
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| Error::Validation(format!("invalid port '{}'", value)))
}

/// Запросить подтверждение да/нет
pub fn confirm(prompt: &str) -> bool {
    print!("{} [y/N] ", prompt);
    io::stdout().flush().ok();

    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        return false;
    }

    matches!(input.trim().to_lowercase().as_str(), "y" | "yes" | "д" | "да")
}

/// tokio runtime для сетевых команд
pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Io(format!("failed to start async runtime: {}", e)))
}
