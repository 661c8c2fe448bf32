//! Интерактивная SSH-сессия с настроенным сервером

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use crossterm::terminal::{self, disable_raw_mode, enable_raw_mode};
use tokio::sync::mpsc;

use crate::api::Backend;
use crate::error::{Error, ErrorKind, Result};
use crate::ssh::SessionEvent;

pub fn run(backend: &Backend, server: &str) -> Result<()> {
    let profile = backend.find_server(server)?;

    println!();
    println!("{} {}", "Подключение к:".cyan(), profile.connection_string().bold());
    println!();

    let runtime = super::runtime()?;
    let result = runtime.block_on(async {
        let result = interactive(backend, &profile.id).await;
        backend.shutdown().await;
        result
    });

    match result {
        Ok(Some(code)) => {
            println!();
            println!("{} (код выхода {})", "Отключено.".green(), code);
            Ok(())
        }
        Ok(None) => {
            println!();
            println!("{}", "Отключено.".green());
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Raw mode терминала на время жизни значения
struct RawMode;

impl RawMode {
    fn enable() -> Result<Self> {
        enable_raw_mode().map_err(|e| Error::Io(e.to_string()))?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        disable_raw_mode().ok();
    }
}

/// Подключиться, передавать stdin в сессию и вывод сессии в stdout
/// до закрытия канала. Возвращает код выхода удалённой оболочки.
async fn interactive(backend: &Backend, server_id: &str) -> Result<Option<u32>> {
    let (cols, rows) = terminal::size().unwrap_or((80, 24));
    let session_id = backend.ssh_connect(server_id, cols as u32, rows as u32).await?;
    let mut events = backend.ssh_subscribe(&session_id).await?;

    let raw_mode = RawMode::enable()?;
    let shutdown = Arc::new(AtomicBool::new(false));

    // Поток чтения stdin
    let (stdin_tx, mut stdin_rx) = mpsc::channel::<Vec<u8>>(100);
    let shutdown_stdin = shutdown.clone();
    std::thread::spawn(move || {
        use std::io::Read;
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 1024];

        while !shutdown_stdin.load(Ordering::Relaxed) {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stdin_tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Поток отслеживания resize
    let (resize_tx, mut resize_rx) = mpsc::channel::<(u16, u16)>(10);
    let shutdown_resize = shutdown.clone();
    std::thread::spawn(move || {
        let mut last = (cols, rows);
        while !shutdown_resize.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(250));

            if let Ok(size) = terminal::size() {
                if size != last {
                    last = size;
                    if resize_tx.blocking_send(size).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut exit_code = None;
    let result = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Data(data)) => {
                    let mut stdout = std::io::stdout();
                    stdout.write_all(&data).ok();
                    stdout.flush().ok();
                }
                Some(SessionEvent::ExitStatus(code)) => exit_code = Some(code),
                Some(SessionEvent::Closed) | None => break Ok(exit_code),
                Some(SessionEvent::Errored(reason)) => break Err(Error::Connection(reason)),
            },

            Some(data) = stdin_rx.recv() => {
                match backend.ssh_write(&session_id, &data).await {
                    Ok(()) => {}
                    // Сессия закрывается; событие Closed придёт следом
                    Err(e) if e.kind() == ErrorKind::SessionState => {}
                    Err(e) => break Err(e),
                }
            }

            Some((cols, rows)) = resize_rx.recv() => {
                backend.ssh_resize(&session_id, cols as u32, rows as u32).await.ok();
            }
        }
    };

    shutdown.store(true, Ordering::Relaxed);
    drop(raw_mode);
    backend.ssh_disconnect(&session_id).await;

    result
}
