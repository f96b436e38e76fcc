//! MCP (Model Context Protocol) server for the 3B1 core.
//!
//! Exposes the machine as a JSON-RPC 2.0 server over stdin/stdout.
//! Tools allow scripts and agents to boot the core, drive bus cycles,
//! inspect registers and memory, and work the floppy drive, all
//! without a CPU interpreter attached.

#![allow(clippy::cast_possible_truncation)]

use std::fs::File;
use std::io::{self, BufRead, Write};

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{CpuLines, SystemConfig, UnixPc};

// ---------------------------------------------------------------------------
// JSON-RPC types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RpcRequest {
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: JsonValue,
    id: JsonValue,
}

#[derive(Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
    id: JsonValue,
}

#[derive(Serialize)]
struct RpcError {
    code: i32,
    message: String,
}

impl RpcResponse {
    fn success(id: JsonValue, result: JsonValue) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    fn error(id: JsonValue, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(RpcError { code, message }),
            id,
        }
    }
}

// ---------------------------------------------------------------------------
// Scripted CPU stand-in
// ---------------------------------------------------------------------------

/// CPU seam for scripted bus cycles: a fixed status register, a
/// bus-error counter, and no timeslice to end.
struct ScriptCpu {
    sr: u16,
    bus_errors: u32,
}

impl ScriptCpu {
    fn new(supervisor: bool) -> Self {
        Self {
            sr: if supervisor { 0x2700 } else { 0x0000 },
            bus_errors: 0,
        }
    }
}

impl CpuLines for ScriptCpu {
    fn status_register(&self) -> u16 {
        self.sr
    }

    fn pulse_bus_error(&mut self) {
        self.bus_errors += 1;
    }

    fn end_timeslice(&mut self) {}
}

// ---------------------------------------------------------------------------
// MCP Server
// ---------------------------------------------------------------------------

/// MCP server wrapping a headless 3B1 core.
pub struct McpServer {
    machine: Option<UnixPc>,
}

impl McpServer {
    #[must_use]
    pub fn new() -> Self {
        Self { machine: None }
    }

    /// Run the server loop: read JSON-RPC from stdin, write responses
    /// to stdout.
    pub fn run(&mut self) {
        let stdin = io::stdin();
        let stdout = io::stdout();
        let mut stdout = stdout.lock();

        for line in stdin.lock().lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => break,
            };

            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }

            let request: RpcRequest = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    let resp =
                        RpcResponse::error(JsonValue::Null, -32700, format!("Parse error: {e}"));
                    let _ = writeln!(
                        stdout,
                        "{}",
                        serde_json::to_string(&resp).unwrap_or_default()
                    );
                    let _ = stdout.flush();
                    continue;
                }
            };

            if request.jsonrpc != "2.0" {
                let resp =
                    RpcResponse::error(request.id, -32600, "Invalid JSON-RPC version".to_string());
                let _ = writeln!(
                    stdout,
                    "{}",
                    serde_json::to_string(&resp).unwrap_or_default()
                );
                let _ = stdout.flush();
                continue;
            }

            let response = self.dispatch(&request.method, &request.params, request.id.clone());
            let _ = writeln!(
                stdout,
                "{}",
                serde_json::to_string(&response).unwrap_or_default()
            );
            let _ = stdout.flush();
        }
    }

    fn dispatch(&mut self, method: &str, params: &JsonValue, id: JsonValue) -> RpcResponse {
        match method {
            "boot" => self.handle_boot(params, id),
            "reset" => self.handle_reset(id),
            "bus_read" => self.handle_bus_read(params, id),
            "bus_write" => self.handle_bus_write(params, id),
            "query" => self.handle_query(params, id),
            "query_memory" => self.handle_query_memory(params, id),
            "poke" => self.handle_poke(params, id),
            "insert_disk" => self.handle_insert_disk(params, id),
            "eject_disk" => self.handle_eject_disk(id),
            "pump_dma" => self.handle_pump_dma(id),
            _ => RpcResponse::error(id, -32601, format!("Unknown method: {method}")),
        }
    }

    fn require_machine(&mut self, id: &JsonValue) -> Result<&mut UnixPc, RpcResponse> {
        if self.machine.is_some() {
            Ok(self.machine.as_mut().expect("checked is_some"))
        } else {
            Err(RpcResponse::error(
                id.clone(),
                -32000,
                "No machine instance. Call 'boot' first.".to_string(),
            ))
        }
    }

    // === Tool handlers ===

    fn handle_boot(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let rom = if let Some(b64) = params.get("rom_data").and_then(|v| v.as_str()) {
            match base64::engine::general_purpose::STANDARD.decode(b64) {
                Ok(d) => d,
                Err(e) => return RpcResponse::error(id, -32602, format!("Invalid base64: {e}")),
            }
        } else if let Some(path) = params.get("rom_path").and_then(|v| v.as_str()) {
            match std::fs::read(path) {
                Ok(d) => d,
                Err(e) => return RpcResponse::error(id, -32602, format!("Cannot read ROM: {e}")),
            }
        } else {
            return RpcResponse::error(
                id,
                -32602,
                "Provide 'rom_data' (base64) or 'rom_path'".to_string(),
            );
        };

        let mut config = SystemConfig::new(rom);
        if let Some(n) = params.get("base_ram_size").and_then(|v| v.as_u64()) {
            config.base_ram_size = n as usize;
        }
        if let Some(n) = params.get("exp_ram_size").and_then(|v| v.as_u64()) {
            config.exp_ram_size = n as usize;
        }

        match UnixPc::new_with_config(config) {
            Ok(machine) => {
                self.machine = Some(machine);
                RpcResponse::success(id, serde_json::json!({"status": "ok"}))
            }
            Err(e) => RpcResponse::error(id, -32000, format!("Boot failed: {e}")),
        }
    }

    fn handle_reset(&mut self, id: JsonValue) -> RpcResponse {
        match self.require_machine(&id) {
            Ok(machine) => {
                machine.reset();
                RpcResponse::success(id, serde_json::json!({"status": "ok"}))
            }
            Err(e) => e,
        }
    }

    fn handle_bus_read(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let (addr, width, supervisor) = match cycle_params(params) {
            Ok(p) => p,
            Err(msg) => return RpcResponse::error(id, -32602, msg),
        };
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };

        let mut cpu = ScriptCpu::new(supervisor);
        let value = match width {
            8 => machine.read_8(&mut cpu, addr),
            16 => machine.read_16(&mut cpu, addr),
            _ => machine.read_32(&mut cpu, addr),
        };

        RpcResponse::success(
            id,
            serde_json::json!({
                "address": addr,
                "width": width,
                "value": value,
                "bus_error": cpu.bus_errors > 0,
            }),
        )
    }

    fn handle_bus_write(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let (addr, width, supervisor) = match cycle_params(params) {
            Ok(p) => p,
            Err(msg) => return RpcResponse::error(id, -32602, msg),
        };
        let value = match params.get("value").and_then(|v| v.as_u64()) {
            Some(v) if v <= 0xFFFF_FFFF => v as u32,
            _ => {
                return RpcResponse::error(
                    id,
                    -32602,
                    "Missing or invalid 'value' (32-bit)".to_string(),
                );
            }
        };
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };

        let mut cpu = ScriptCpu::new(supervisor);
        match width {
            8 => machine.write_8(&mut cpu, addr, value),
            16 => machine.write_16(&mut cpu, addr, value),
            _ => machine.write_32(&mut cpu, addr, value),
        }

        RpcResponse::success(
            id,
            serde_json::json!({
                "address": addr,
                "width": width,
                "bus_error": cpu.bus_errors > 0,
            }),
        )
    }

    fn handle_query(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };

        let path = match params.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return RpcResponse::error(id, -32602, "Missing 'path' parameter".to_string()),
        };

        let value: Option<JsonValue> = match path {
            "genstat" => Some(machine.genstat.into()),
            "bsr0" => Some(machine.bsr0.into()),
            "bsr1" => Some(machine.bsr1.into()),
            "leds" => Some(machine.leds.into()),
            "pie" => Some(machine.pie.into()),
            "romlmap" => Some(machine.romlmap.into()),
            "dmaen" => Some(machine.dmaen.into()),
            "idmarw" => Some(machine.idmarw.into()),
            "dma_reading" => Some(machine.dma_reading.into()),
            "dma_address" => Some(machine.dma_address.into()),
            "dma_count" => Some(machine.dma_count.into()),
            "fdc.status" => Some(machine.fdc.status().into()),
            "fdc.track" => Some(machine.fdc.track().into()),
            "fdc.sector" => Some(machine.fdc.sector().into()),
            "fdc.irq" => Some(machine.fdc.irq().into()),
            "fdc.drq" => Some(machine.fdc.drq().into()),
            _ => None,
        };

        match value {
            Some(v) => {
                RpcResponse::success(id, serde_json::json!({"path": path, "value": v}))
            }
            None => RpcResponse::error(id, -32000, format!("Unknown query path: {path}")),
        }
    }

    fn handle_query_memory(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };

        let address = match params.get("address").and_then(|v| v.as_u64()) {
            Some(a) if a <= 0x00FF_FFFF => a as u32,
            _ => {
                return RpcResponse::error(
                    id,
                    -32602,
                    "Missing or invalid 'address' (0-16777215, 24-bit)".to_string(),
                );
            }
        };

        let length = match params.get("length").and_then(|v| v.as_u64()) {
            Some(l) if (1..=65536).contains(&l) => l as usize,
            Some(_) => {
                return RpcResponse::error(id, -32602, "Invalid 'length' (1-65536)".to_string());
            }
            None => {
                return RpcResponse::error(id, -32602, "Missing 'length' parameter".to_string());
            }
        };

        let bytes: Vec<u8> = (0..length)
            .map(|i| machine.peek_8(address.wrapping_add(i as u32) & 0x00FF_FFFF))
            .collect();

        RpcResponse::success(
            id,
            serde_json::json!({
                "address": address,
                "length": length,
                "data": bytes,
            }),
        )
    }

    fn handle_poke(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };

        let addr = match params.get("address").and_then(|v| v.as_u64()) {
            Some(a) if a <= 0x00FF_FFFF => a as u32,
            _ => {
                return RpcResponse::error(
                    id,
                    -32602,
                    "Missing or invalid 'address' (0-16777215, 24-bit)".to_string(),
                );
            }
        };

        let value = match params.get("value").and_then(|v| v.as_u64()) {
            Some(v) if v <= 0xFF => v as u32,
            _ => {
                return RpcResponse::error(
                    id,
                    -32602,
                    "Missing or invalid 'value' (0-255)".to_string(),
                );
            }
        };

        let mut cpu = ScriptCpu::new(true);
        machine.write_8(&mut cpu, addr, value);
        RpcResponse::success(id, serde_json::json!({"address": addr, "value": value}))
    }

    fn handle_insert_disk(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let sector_size = params
            .get("sector_size")
            .and_then(|v| v.as_u64())
            .unwrap_or(512) as u32;
        let sectors_per_track = params
            .get("sectors_per_track")
            .and_then(|v| v.as_u64())
            .unwrap_or(10) as u32;
        let heads = params.get("heads").and_then(|v| v.as_u64()).unwrap_or(2) as u32;
        let writeable = params
            .get("writeable")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };

        let result = if let Some(b64) = params.get("data").and_then(|v| v.as_str()) {
            match base64::engine::general_purpose::STANDARD.decode(b64) {
                Ok(d) => machine.load_floppy(Box::new(d), sector_size, sectors_per_track, heads, writeable),
                Err(e) => return RpcResponse::error(id, -32602, format!("Invalid base64: {e}")),
            }
        } else if let Some(path) = params.get("path").and_then(|v| v.as_str()) {
            let file = File::options().read(true).write(writeable).open(path);
            match file {
                Ok(f) => machine.load_floppy(Box::new(f), sector_size, sectors_per_track, heads, writeable),
                Err(e) => return RpcResponse::error(id, -32602, format!("Cannot open image: {e}")),
            }
        } else {
            return RpcResponse::error(id, -32602, "Provide 'data' (base64) or 'path'".to_string());
        };

        match result {
            Ok(()) => RpcResponse::success(id, serde_json::json!({"status": "ok"})),
            Err(e) => RpcResponse::error(id, -32000, format!("Image load failed: {e}")),
        }
    }

    fn handle_eject_disk(&mut self, id: JsonValue) -> RpcResponse {
        match self.require_machine(&id) {
            Ok(machine) => {
                machine.eject_floppy();
                RpcResponse::success(id, serde_json::json!({"status": "ok"}))
            }
            Err(e) => e,
        }
    }

    fn handle_pump_dma(&mut self, id: JsonValue) -> RpcResponse {
        match self.require_machine(&id) {
            Ok(machine) => {
                let words = machine.dma_pump();
                RpcResponse::success(id, serde_json::json!({"words": words}))
            }
            Err(e) => e,
        }
    }
}

impl Default for McpServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared address/width/mode parsing for the bus cycle tools.
fn cycle_params(params: &JsonValue) -> Result<(u32, u32, bool), String> {
    let addr = match params.get("address").and_then(|v| v.as_u64()) {
        Some(a) if a <= 0x00FF_FFFF => a as u32,
        _ => return Err("Missing or invalid 'address' (0-16777215, 24-bit)".to_string()),
    };
    let width = match params.get("width").and_then(|v| v.as_u64()) {
        None => 16,
        Some(w @ (8 | 16 | 32)) => w as u32,
        Some(_) => return Err("Invalid 'width' (8, 16 or 32)".to_string()),
    };
    let supervisor = match params.get("mode").and_then(|v| v.as_str()) {
        None | Some("supervisor") => true,
        Some("user") => false,
        Some(other) => return Err(format!("Invalid 'mode': {other}")),
    };
    Ok((addr, width, supervisor))
}
