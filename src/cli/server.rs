//! Команды управления серверами

use std::fs;

use colored::Colorize;
use secrecy::ExposeSecret;

use crate::api::Backend;
use crate::config::{AuthKind, AuthMethod, ProxyConfig, ProxyKind, ServerProfile};
use crate::error::{Error, Result};

use super::{confirm, prompt, prompt_password, prompt_port, prompt_required};

/// Показать список всех настроенных серверов
pub fn list(backend: &Backend) -> Result<()> {
    println!("{}", "=== Настроенные серверы ===".cyan().bold());
    println!();

    let servers = backend.get_servers();
    if servers.is_empty() {
        println!("Серверы не настроены.");
        println!();
        println!("Выполните {} для добавления сервера.", "shellvault server add".cyan());
        return Ok(());
    }

    println!(
        "{:<20} {:<32} {:<8} {:<20}",
        "ИМЯ".bold(),
        "ПОДКЛЮЧЕНИЕ".bold(),
        "ВХОД".bold(),
        "ЧЕРЕЗ".bold()
    );
    println!("{}", "─".repeat(80).dimmed());

    for server in &servers {
        let auth = match server.auth_kind {
            AuthKind::Password => "пароль",
            AuthKind::Key => "ключ",
        };
        let via = match (&server.jump_host, server.has_proxy) {
            (Some(jump), _) => servers
                .iter()
                .find(|s| &s.id == jump)
                .map(|s| s.name.clone())
                .unwrap_or_else(|| jump.clone()),
            (None, true) => "прокси".to_string(),
            (None, false) => String::new(),
        };

        println!(
            "{:<20} {:<32} {:<8} {:<20}",
            server.name,
            format!("{}@{}:{}", server.username, server.host, server.port),
            auth,
            via
        );
    }

    println!();
    Ok(())
}

/// Подробности о сервере, без секретов
pub fn show(backend: &Backend, server: &str) -> Result<()> {
    let profile = backend.find_server(server)?;

    println!("{}", format!("=== {} ===", profile.name).cyan().bold());
    println!("{:<14} {}", "id:", profile.id);
    println!("{:<14} {}", "Подключение:", profile.connection_string());

    let auth = match &profile.auth {
        AuthMethod::Password { .. } => "пароль".to_string(),
        AuthMethod::PrivateKey { passphrase, .. } => match passphrase {
            Some(_) => "приватный ключ (с парольной фразой)".to_string(),
            None => "приватный ключ".to_string(),
        },
    };
    println!("{:<14} {}", "Вход:", auth);

    if let Some(proxy) = &profile.proxy {
        let kind = match proxy.kind {
            ProxyKind::Socks5 => "SOCKS5",
            ProxyKind::Http => "HTTP",
        };
        println!("{:<14} {} {}:{}", "Прокси:", kind, proxy.host, proxy.port);
    }
    if let Some(jump_id) = &profile.jump_host {
        let name = backend
            .get_server(jump_id)
            .map(|s| s.name)
            .unwrap_or_else(|_| jump_id.clone());
        println!("{:<14} {}", "Через:", name);
    }
    if let Some(notes) = &profile.notes {
        println!("{:<14} {}", "Заметки:", notes);
    }

    Ok(())
}

/// Добавить новый сервер
pub fn add(backend: &Backend) -> Result<()> {
    println!("{}", "=== Добавление сервера ===".cyan().bold());
    println!();

    let profile = prompt_server_details(backend)?;
    let name = profile.name.clone();
    backend.save_server(profile)?;

    println!();
    println!("{} Сервер '{}' добавлен!", "Успех:".green().bold(), name);
    Ok(())
}

/// Удалить сервер
pub fn remove(backend: &Backend, server: &str) -> Result<()> {
    let profile = backend.find_server(server)?;

    if !confirm(&format!("Удалить сервер '{}'?", profile.name)) {
        println!("Отменено.");
        return Ok(());
    }

    backend.delete_server(&profile.id)?;
    println!("{} Сервер '{}' удалён.", "Успех:".green().bold(), profile.name);
    Ok(())
}

fn prompt_server_details(backend: &Backend) -> Result<ServerProfile> {
    let name = prompt_required("Имя сервера")?;
    let host = prompt_required("Хост")?;
    let port = prompt_port("Порт", 22)?;
    let username = prompt_required("Пользователь")?;

    let auth = match prompt("Способ входа (password/key)", Some("password"))?.as_str() {
        "password" | "p" => AuthMethod::Password {
            password: prompt_password("Пароль SSH: ")?.expose_secret().clone(),
        },
        "key" | "k" => prompt_private_key()?,
        other => return Err(Error::Validation(format!("unknown auth type '{}'", other))),
    };

    let mut profile = ServerProfile::new(name, host, port, username, auth);

    let proxy = prompt("Прокси (none/socks5/http)", Some("none"))?;
    match proxy.as_str() {
        "none" | "" => {}
        "socks5" | "http" => profile = profile.with_proxy(prompt_proxy(&proxy)?),
        other => return Err(Error::Validation(format!("unknown proxy type '{}'", other))),
    }

    let jump = prompt("Промежуточный сервер (имя, пусто - нет)", Some(""))?;
    if !jump.is_empty() {
        let jump_profile = backend.find_server(&jump)?;
        profile = profile.with_jump_host(jump_profile.id);
    }

    let notes = prompt("Заметки", Some(""))?;
    if !notes.is_empty() {
        profile = profile.with_notes(notes);
    }

    Ok(profile)
}

fn prompt_private_key() -> Result<AuthMethod> {
    let path = prompt_required("Путь к приватному ключу")?;
    let key = fs::read_to_string(&path)?;

    let passphrase = prompt_password("Парольная фраза (пусто - нет): ")?;
    let passphrase = Some(passphrase.expose_secret().clone()).filter(|p| !p.is_empty());

    // Проверить ключ сразу, а не при первом подключении
    russh_keys::decode_secret_key(&key, passphrase.as_deref())?;

    Ok(AuthMethod::PrivateKey { key, passphrase })
}

fn prompt_proxy(kind: &str) -> Result<ProxyConfig> {
    let kind = if kind == "http" { ProxyKind::Http } else { ProxyKind::Socks5 };
    let default_port = match kind {
        ProxyKind::Http => 8080,
        ProxyKind::Socks5 => 1080,
    };

    let host = prompt_required("Хост прокси")?;
    let port = prompt_port("Порт прокси", default_port)?;
    let username = prompt("Пользователь прокси (пусто - без авторизации)", Some(""))?;

    let (username, password) = if username.is_empty() {
        (None, None)
    } else {
        let password = prompt_password("Пароль прокси: ")?;
        (Some(username), Some(password.expose_secret().clone()))
    };

    Ok(ProxyConfig {
        kind,
        host,
        port,
        username,
        password,
    })
}
