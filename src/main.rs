use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;

use shellvault::cli;
use shellvault::cli::sftp::SftpAction;
use shellvault::config::Settings;
use shellvault::{logging, Result};

#[derive(Parser)]
#[command(name = "shellvault")]
#[command(author = "Oleg")]
#[command(version)]
#[command(about = "Зашифрованное хранилище SSH-серверов с терминалом и SFTP", long_about = None)]
struct Cli {
    /// Каталог данных (хранилище и settings.json)
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Подробный лог в stderr (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Управление конфигурациями серверов
    Server {
        #[command(subcommand)]
        action: ServerCommands,
    },

    /// Экспортировать серверы в зашифрованный файл
    Export { file: PathBuf },

    /// Импортировать серверы из зашифрованного файла
    Import { file: PathBuf },

    /// Сменить мастер-пароль
    ChangePass,

    /// Открыть терминал на сервере
    Connect {
        /// Имя или id сервера
        server: String,
    },

    /// Файловые операции по SFTP
    Sftp {
        /// Имя или id сервера
        server: String,
        #[command(subcommand)]
        action: SftpAction,
    },
}

#[derive(Subcommand)]
enum ServerCommands {
    /// Показать список серверов
    List,
    /// Показать сервер
    Show { server: String },
    /// Добавить новый сервер
    Add,
    /// Удалить сервер
    Remove { server: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "Ошибка:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.data_dir.as_deref())?;
    let backend = cli::unlock(settings)?;

    match cli.command {
        Commands::Server { action } => match action {
            ServerCommands::List => cli::server::list(&backend),
            ServerCommands::Show { server } => cli::server::show(&backend, &server),
            ServerCommands::Add => cli::server::add(&backend),
            ServerCommands::Remove { server } => cli::server::remove(&backend, &server),
        },
        Commands::Export { file } => cli::backup::export(&backend, &file),
        Commands::Import { file } => cli::backup::import(&backend, &file),
        Commands::ChangePass => cli::change_pass::run(&backend),
        Commands::Connect { server } => cli::connect::run(&backend, &server),
        Commands::Sftp { server, action } => cli::sftp::run(&backend, &server, action),
    }
}
