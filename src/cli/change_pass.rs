//! Смена мастер-пароля

use colored::Colorize;
use secrecy::ExposeSecret;

use crate::api::Backend;
use crate::error::Result;

use super::{prompt_new_password, MIN_PASSWORD_LEN};

pub fn run(backend: &Backend) -> Result<()> {
    println!("{}", "=== Смена мастер-пароля ===".cyan().bold());
    println!();

    let new_password = prompt_new_password("Новый мастер-пароль", MIN_PASSWORD_LEN)?;
    println!();

    // Перешифровать хранилище новым паролем
    print!("{}", "Перешифровка данных... ".cyan());
    std::io::Write::flush(&mut std::io::stdout())?;

    backend.change_master_password(new_password.expose_secret().as_bytes())?;
    println!("{}", "готово".green());

    println!();
    println!("{}", "Пароль успешно изменён!".green().bold());
    Ok(())
}
