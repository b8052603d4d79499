use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::config::AppSettings;
use crate::controller::{SlaveController, ToggleOutcome};
use crate::device::{DeviceEvent, TransportKind};
use crate::registers::{RegisterClass, RegisterStore, TABLE_COLUMNS};
use crate::serial::SerialInterface;

pub const HELP: &str = "\
commands:
  type serial|tcp|0|1      select the transport
  port <name|host:port>    serial port name or network address
  unit <0-255>             server (unit) address
  quantity <n>             number of registers
  set <row> <col> <value>  edit a table cell
  connect                  connect or disconnect
  show                     print the register table
  ports                    list serial ports
  status                   connection state and last message
  save [path]              write the current settings
  quit";

/// A line typed into the console
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Help,
    Status,
    Show,
    Ports,
    Connect,
    Transport(TransportKind),
    Port(String),
    Unit(u8),
    Quantity(usize),
    Set { row: usize, column: usize, text: String },
    Save(Option<PathBuf>),
    Quit,
}

/// Parse one console line. Blank lines give `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = parts.collect();

    let command = match (verb.to_lowercase().as_str(), rest.as_slice()) {
        ("help" | "?", _) => ConsoleCommand::Help,
        ("status", []) => ConsoleCommand::Status,
        ("show", []) => ConsoleCommand::Show,
        ("ports", []) => ConsoleCommand::Ports,
        ("connect" | "disconnect", []) => ConsoleCommand::Connect,
        ("quit" | "exit", []) => ConsoleCommand::Quit,
        ("type", [kind]) => ConsoleCommand::Transport(
            TransportKind::parse(kind)
                .or_else(|| kind.parse().ok().and_then(TransportKind::from_index))
                .ok_or_else(|| format!("Unknown transport: {}", kind))?,
        ),
        ("port", []) => ConsoleCommand::Port(String::new()),
        ("port", [port]) => ConsoleCommand::Port(port.to_string()),
        ("unit", [unit]) => ConsoleCommand::Unit(
            unit.parse()
                .map_err(|_| format!("Server address must be 0-255, got {}", unit))?,
        ),
        ("quantity", [quantity]) => ConsoleCommand::Quantity(
            quantity
                .parse()
                .map_err(|_| format!("Invalid register quantity: {}", quantity))?,
        ),
        ("set", [row, column, text @ ..]) => ConsoleCommand::Set {
            row: row.parse().map_err(|_| format!("Invalid row: {}", row))?,
            column: column.parse().map_err(|_| format!("Invalid column: {}", column))?,
            text: text.join(" "),
        },
        ("save", []) => ConsoleCommand::Save(None),
        ("save", [path]) => ConsoleCommand::Save(Some(PathBuf::from(path))),
        _ => return Err(format!("Unknown command: {} (type 'help')", line.trim())),
    };
    Ok(Some(command))
}

/// Apply a command to the controller and describe the result
pub async fn execute(
    controller: &mut SlaveController,
    command: ConsoleCommand,
    settings_path: &Path,
) -> Result<String, String> {
    match command {
        ConsoleCommand::Help => Ok(HELP.to_string()),
        ConsoleCommand::Status => Ok(describe_status(controller)),
        ConsoleCommand::Show => Ok(render_table(controller)),
        ConsoleCommand::Ports => {
            let ports = SerialInterface::discover_ports()
                .map_err(|e| format!("Failed to list serial ports: {}", e))?;
            if ports.is_empty() {
                return Ok("no serial ports found".to_string());
            }
            Ok(ports
                .iter()
                .map(|p| match (&p.manufacturer, &p.product) {
                    (Some(m), Some(prod)) => format!("{} ({} {})", p.port_name, m, prod),
                    _ => p.port_name.clone(),
                })
                .collect::<Vec<_>>()
                .join("\n"))
        }
        ConsoleCommand::Connect => {
            let outcome = controller.toggle_connection().await;
            let status = controller.status_message().unwrap_or_default().to_string();
            match outcome {
                ToggleOutcome::ConnectFailed => Err(status),
                ToggleOutcome::Busy => Err("Still disconnecting, try again shortly".to_string()),
                _ => Ok(status),
            }
        }
        ConsoleCommand::Transport(kind) => {
            controller
                .select_transport(kind)
                .await
                .map_err(|e| format!("Failed to select transport: {}", e))?;
            Ok(format!(
                "{} transport selected, port '{}'",
                kind.as_str(),
                controller.settings().port
            ))
        }
        ConsoleCommand::Port(port) => {
            controller.set_port(port);
            Ok(format!("port set to '{}'", controller.settings().port))
        }
        ConsoleCommand::Unit(unit) => {
            controller.set_server_address(unit);
            Ok(format!("server address set to {}", unit))
        }
        ConsoleCommand::Quantity(quantity) => {
            controller
                .set_register_quantity(quantity)
                .map_err(|e| format!("Failed to resize register map: {}", e))?;
            Ok(format!(
                "{} registers, {} table rows",
                quantity,
                controller.table().row_count()
            ))
        }
        ConsoleCommand::Set { row, column, text } => {
            let applied = controller
                .edit_cell(row, column, &text)
                .map_err(|e| e.to_string())?;
            if applied {
                Ok(format!("register {} = {}", row * TABLE_COLUMNS + column, text))
            } else {
                Ok(format!("cell ({}, {}) saved, applied on next connect", row, column))
            }
        }
        ConsoleCommand::Save(path) => {
            let path = path.unwrap_or_else(|| settings_path.to_path_buf());
            controller
                .settings()
                .save(&path)
                .map_err(|e| format!("Failed to save settings: {}", e))?;
            Ok(format!("settings saved to {}", path.display()))
        }
        ConsoleCommand::Quit => Ok(String::new()),
    }
}

fn describe_status(controller: &SlaveController) -> String {
    let actions = controller.manager().actions();
    format!(
        "{} transport, {}{}, next action: {}{}",
        controller.manager().transport_kind().as_str(),
        controller.state().as_str(),
        controller
            .manager()
            .local_address()
            .map(|addr| format!(" on {}", addr))
            .unwrap_or_default(),
        if actions.connect_enabled || actions.disconnect_enabled {
            actions.connect_label
        } else {
            "none"
        },
        controller
            .status_message()
            .map(|m| format!(" | {}", m))
            .unwrap_or_default()
    )
}

/// Print the holding registers laid out like the table
pub fn render_table(controller: &SlaveController) -> String {
    let table = controller.table();
    let store = controller.store();
    let store = RegisterStore::lock(&store);

    let mut out = format!("{:>7}", "");
    for label in table.column_labels() {
        out.push_str(&format!("{:>7}", label));
    }
    for (row, label) in table.row_labels().iter().enumerate() {
        out.push('\n');
        out.push_str(&format!("{:>7}", label));
        for column in 0..table.column_count() {
            let address = row * TABLE_COLUMNS + column;
            match store.read(RegisterClass::HoldingRegisters, address) {
                Ok(value) => out.push_str(&format!("{:>7}", value)),
                Err(_) => out.push_str(&format!("{:>7}", "-")),
            }
        }
    }
    out
}

/// Interactive loop: console lines, transport notifications and device events
pub async fn run_console(settings: AppSettings, settings_path: PathBuf) -> anyhow::Result<()> {
    let mut controller = SlaveController::new(settings).await;
    let mut events = controller.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{}", HELP);
    println!("{}", describe_status(&controller));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read console input")? else {
                    break;
                };
                match parse_command(&line) {
                    Ok(Some(ConsoleCommand::Quit)) => break,
                    Ok(Some(command)) => match execute(&mut controller, command, &settings_path).await {
                        Ok(output) if !output.is_empty() => println!("{}", output),
                        Ok(_) => {}
                        Err(e) => eprintln!("{}", e),
                    },
                    Ok(None) => {}
                    Err(e) => eprintln!("{}", e),
                }
            }
            notification = controller.manager_mut().next_notification() => {
                if let Some(event) = notification {
                    controller.manager_mut().handle_notification(event);
                }
            }
            event = events.recv() => match event {
                Ok(DeviceEvent::StateChanged { state, actions, .. }) => {
                    println!("[{}] button: {}", state.as_str(), actions.connect_label);
                }
                Ok(DeviceEvent::Status(message)) => println!("[status] {}", message),
                Ok(DeviceEvent::RegistersWritten { class, address, count }) => {
                    println!("[modbus] {} {} register(s) written at {}", class, count, address);
                }
                Err(RecvError::Lagged(skipped)) => log::warn!("Console skipped {} device events", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    log::info!("Console closed");
    Ok(())
}
