//! Debug adapter
//!
//! Drives a paused interpreter one instruction at a time on behalf of a
//! DAP client. The drive loop drains every queued command, then either
//! executes exactly one instruction (running) or blocks on the command
//! queue's condition variable (paused or idle).

mod protocol;
mod server;

pub use server::Server;

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value as Json};

use crate::interp::{pack_address, unpack_address, Binding, Interpreter, Item, Value};
use crate::lexer::Span;
use protocol::{stop_event, Event, Request};

/// How long the drive loop sleeps when there is nothing to do
const IDLE_WAIT: Duration = Duration::from_secs(10);

/// Serve one debug session on `listen` and print the final stack.
pub fn serve(listen: &str) -> io::Result<()> {
    let server = Server::start(listen)?;
    let mut debugger = Debugger::new(server);
    debugger.run();
    if let Some(vm) = &debugger.interpreter {
        println!("{}", Value::List(vm.stack().to_vec()));
    }
    debugger.shutdown();
    Ok(())
}

/// Dispatches DAP requests against the interpreter's introspection
/// surface
pub struct Debugger {
    server: Server,
    interpreter: Option<Interpreter>,
    source_path: String,
    source_name: String,
    source_text: String,
    quit: bool,
    running: bool,
    /// Index = variablesReference; 0 is reserved for "no children"
    variable_refs: Vec<String>,
}

impl Debugger {
    pub fn new(server: Server) -> Debugger {
        Debugger {
            server,
            interpreter: None,
            source_path: String::new(),
            source_name: String::new(),
            source_text: String::new(),
            quit: false,
            running: false,
            variable_refs: vec!["::none".to_string()],
        }
    }

    /// Drain commands, then run one instruction or wait.
    pub fn run(&mut self) {
        while !self.quit && !self.server.quitting() {
            while let Some(request) = self.server.take_command() {
                self.handle(request);
                if self.quit {
                    return;
                }
            }

            if self.running && self.interpreter.is_some() {
                self.step_running();
            } else {
                self.server.wait(IDLE_WAIT);
            }
        }
    }

    fn shutdown(self) {
        self.server.stop();
    }

    fn step_running(&mut self) {
        let step = match self.interpreter.as_mut() {
            Some(vm) => vm.execute_instruction(),
            None => return,
        };
        if let Err(e) = step {
            eprintln!("runtime error: {e}");
            self.running = false;
            self.server.send(&stop_event("exception"));
            return;
        }
        if self.interpreter.as_ref().is_some_and(Interpreter::done) {
            self.running = false;
            self.server.send(&Event::new("terminated"));
        }
    }

    fn handle(&mut self, request: Request) {
        match request.command.as_str() {
            "initialize" => self.initialize(&request),
            "launch" => self.launch(&request),
            "disconnect" => self.disconnect(&request),
            "setBreakpoints" => self.set_breakpoints(&request),
            "setExceptionBreakpoints" => self.respond(&request, Json::Null),
            "threads" => self.threads(&request),
            "pause" => self.pause(&request),
            "continue" => self.resume(&request),
            "stackTrace" => self.stack_trace(&request),
            "evaluate" => self.evaluate(&request),
            "scopes" => self.scopes(&request),
            "disassemble" => self.disassemble(&request),
            "stepIn" => self.step_in(&request),
            "stepOut" => self.step_out(&request),
            "next" => self.next(&request),
            "variables" => self.variables(&request),
            "setVariable" => self.set_variable(&request),
            _ => {}
        }
    }

    fn respond(&mut self, request: &Request, body: Json) {
        self.server.send(&request.response(body));
    }

    fn initialize(&mut self, request: &Request) {
        self.respond(
            request,
            json!({
                "supportsConfigurationDoneRequest": false,
                "supportsSetVariable": true,
                "supportsFunctionBreakpoints": false,
                "supportsConditionalBreakpoints": false,
                "supportsHitConditionalBreakpoints": false,
                "supportsEvaluateForHovers": true,
                "supportsExceptionFilterOptions": false,
                "supportsSteppingGranularity": true,
                "supportsBreakpointLocationsRequest": false,
                "supportsReadMemoryRequest": true,
                "supportsDataBreakpoints": false,
                "supportsDisassembleRequest": true,
                "supportsLogPoints": false,
                "supportsExceptionInfoRequest": false,
                "supportsExceptionOptions": false,
            }),
        );
    }

    fn launch(&mut self, request: &Request) {
        let script = request.arguments["script"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        match fs::read_to_string(&script) {
            Ok(text) => {
                let text = text.replace('\r', "");
                self.interpreter = Some(Interpreter::new(&text));
                self.source_text = text;
                self.source_name = Path::new(&script)
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| script.clone());
                self.source_path = script;

                self.respond(request, Json::Null);
                self.server.send(&Event::new("initialized"));
                self.server.send(&stop_event("entry"));
            }
            Err(_) => {
                self.server
                    .send(&request.error_response("error: file not found"));
            }
        }
    }

    fn disconnect(&mut self, request: &Request) {
        self.quit = true;
        self.respond(request, Json::Null);
        self.server
            .send(&Event::with_body("exited", json!({ "exitCode": 0 })));
    }

    fn set_breakpoints(&mut self, request: &Request) {
        let mut breakpoints = request.arguments["breakpoints"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        for breakpoint in &mut breakpoints {
            breakpoint["verified"] = json!(true);
        }
        self.respond(request, json!({ "breakpoints": breakpoints }));
    }

    fn threads(&mut self, request: &Request) {
        self.respond(
            request,
            json!({ "threads": [{ "id": 0, "name": "main" }] }),
        );
    }

    fn pause(&mut self, request: &Request) {
        self.running = false;
        self.respond(request, Json::Null);
        self.server.send(&stop_event("paused"));
    }

    fn resume(&mut self, request: &Request) {
        self.running = true;
        self.respond(request, json!({ "allThreadsContinued": true }));
    }

    fn step_in(&mut self, request: &Request) {
        self.respond(request, Json::Null);
        if let Some(vm) = self.interpreter.as_mut() {
            if let Err(e) = vm.execute_instruction() {
                eprintln!("runtime error: {e}");
            }
        }
        self.server.send(&stop_event("step"));
    }

    fn step_out(&mut self, request: &Request) {
        self.respond(request, Json::Null);
        if let Some(vm) = self.interpreter.as_mut() {
            let depth = vm.frames().len().saturating_sub(1);
            if let Err(e) = vm.run_to_depth(depth) {
                eprintln!("runtime error: {e}");
            }
        }
        self.server.send(&stop_event("step"));
    }

    fn next(&mut self, request: &Request) {
        self.respond(request, Json::Null);
        if let Some(vm) = self.interpreter.as_mut() {
            let depth = vm.frames().len();
            let result = vm
                .execute_instruction()
                .and_then(|_| vm.run_to_depth(depth));
            if let Err(e) = result {
                eprintln!("runtime error: {e}");
            }
        }
        self.server.send(&stop_event("step"));
    }

    fn scopes(&mut self, request: &Request) {
        let reference = self.variable_ref("::built-ins");
        self.respond(
            request,
            json!({
                "scopes": [{
                    "name": "built-ins",
                    "variablesReference": reference,
                    "indexedVariables": 10,
                    "expensive": false,
                }]
            }),
        );
    }

    fn evaluate(&mut self, request: &Request) {
        let expression = request.arguments["expression"].as_str().unwrap_or_default();
        let result = self
            .interpreter
            .as_ref()
            .and_then(|vm| vm.symbols().get(expression))
            .map(render_binding)
            .unwrap_or_else(|| "undefined".to_string());
        self.respond(request, json!({ "result": result }));
    }

    fn stack_trace(&mut self, request: &Request) {
        let mut frames = Vec::new();
        if let Some(vm) = &self.interpreter {
            for (i, frame) in vm.frames().iter().enumerate() {
                let (line, column) = line_column(&self.source_text, frame.current_span());
                let mut entry = json!({
                    "id": i + 1,
                    "name": frame.to_string(),
                    "instructionPointerReference":
                        format!("0x{:06x}", pack_address(i, frame.ip())),
                    "line": line + 1,
                    "column": column + 1,
                });
                if frame.has_source() {
                    entry["source"] = json!({
                        "name": self.source_name,
                        "path": self.source_path,
                    });
                }
                frames.push(entry);
            }
        }
        frames.reverse();
        self.respond(request, json!({ "stackFrames": frames }));
    }

    fn disassemble(&mut self, request: &Request) {
        let reference = request.arguments["memoryReference"]
            .as_str()
            .unwrap_or("0x0");
        let address = u64::from_str_radix(reference.trim_start_matches("0x"), 16).unwrap_or(0);
        let (frame_idx, _) = unpack_address(address);

        let mut instructions = Vec::new();
        if let Some(frame) = self
            .interpreter
            .as_ref()
            .and_then(|vm| vm.frames().get(frame_idx))
        {
            let mut copy = frame.clone();
            copy.reset();
            let mut items = Vec::new();
            while let Ok(Some(item)) = copy.next_item(None) {
                items.push(render_item(&item));
            }

            let mut offset = 0usize;
            for (i, text) in items.iter().enumerate() {
                let mut instruction = json!({
                    "address": format!("0x{:06x}", pack_address(frame_idx, offset)),
                    "instruction": text,
                });
                if i == 0 {
                    instruction["location"] = json!({
                        "name": self.source_name,
                        "path": self.source_path,
                    });
                }
                instructions.push(instruction);
                offset += text.len();
            }
        }

        self.respond(request, json!({ "instructions": instructions }));
    }

    fn variables(&mut self, request: &Request) {
        let reference = request.arguments["variablesReference"]
            .as_i64()
            .unwrap_or(0);
        let variables = self.create_variables(reference);
        self.respond(request, json!({ "variables": variables }));
    }

    fn set_variable(&mut self, request: &Request) {
        let reference = request.arguments["variablesReference"]
            .as_i64()
            .unwrap_or(0);
        let name = request.arguments["name"].as_str().unwrap_or_default();
        let text = request.arguments["value"].as_str().unwrap_or_default();

        let category = self
            .variable_refs
            .get(reference as usize)
            .cloned()
            .unwrap_or_default();
        let rendered = if category == "::variables" {
            self.set_symbol_from_text(name, text)
        } else {
            None
        };

        let value = rendered.unwrap_or_else(|| "undefined".to_string());
        self.respond(request, json!({ "value": value }));
    }

    /// Allocate or reuse the variablesReference slot for a category.
    fn variable_ref(&mut self, name: &str) -> i64 {
        if let Some(idx) = self.variable_refs.iter().position(|n| n == name) {
            return idx as i64;
        }
        self.variable_refs.push(name.to_string());
        (self.variable_refs.len() - 1) as i64
    }

    fn create_variables(&mut self, reference: i64) -> Vec<Json> {
        let Some(name) = self.variable_refs.get(reference as usize).cloned() else {
            return Vec::new();
        };
        match name.as_str() {
            "::built-ins" => self.fetch_built_ins(),
            "::stack" => self.fetch_stack(),
            "::variables" => self.fetch_variables(),
            "::loop_registers" => self.fetch_loop_registers(),
            symbol => self
                .interpreter
                .as_ref()
                .and_then(|vm| vm.symbols().get(symbol))
                .map(|binding| {
                    vec![json!({
                        "name": symbol,
                        "value": render_binding(binding),
                        "variablesReference": 0,
                    })]
                })
                .unwrap_or_default(),
        }
    }

    fn fetch_built_ins(&mut self) -> Vec<Json> {
        let (stack_preview, loop_label) = match &self.interpreter {
            Some(vm) => (
                Value::List(vm.stack().to_vec()).to_string(),
                vm.current_frame()
                    .filter(|frame| !frame.has_source())
                    .map(|frame| frame.to_string()),
            ),
            None => return Vec::new(),
        };

        let stack_ref = self.variable_ref("::stack");
        let vars_ref = self.variable_ref("::variables");
        let mut out = vec![
            json!({
                "name": "stack",
                "value": stack_preview,
                "variablesReference": stack_ref,
            }),
            json!({
                "name": "variables",
                "value": "<variable table>",
                "variablesReference": vars_ref,
            }),
        ];

        if let Some(label) = loop_label {
            let registers_ref = self.variable_ref("::loop_registers");
            out.push(json!({
                "name": "loop registers",
                "value": label,
                "variablesReference": registers_ref,
            }));
        }

        out
    }

    fn fetch_stack(&self) -> Vec<Json> {
        let Some(vm) = &self.interpreter else {
            return Vec::new();
        };
        vm.stack()
            .iter()
            .enumerate()
            .rev()
            .map(|(i, value)| {
                json!({
                    "name": i.to_string(),
                    "value": value.to_string(),
                    "variablesReference": 0,
                })
            })
            .collect()
    }

    /// Only symbols that differ from the pristine defaults are listed.
    fn fetch_variables(&self) -> Vec<Json> {
        let Some(vm) = &self.interpreter else {
            return Vec::new();
        };
        vm.symbol_diff()
            .into_iter()
            .map(|(name, binding)| {
                json!({
                    "name": name,
                    "value": render_binding(binding),
                    "variablesReference": 0,
                })
            })
            .collect()
    }

    fn fetch_loop_registers(&self) -> Vec<Json> {
        let Some(frame) = self.interpreter.as_ref().and_then(Interpreter::current_frame) else {
            return Vec::new();
        };
        frame
            .registers()
            .into_iter()
            .map(|(name, value)| {
                json!({
                    "name": name,
                    "value": value,
                    "variablesReference": 0,
                })
            })
            .collect()
    }

    /// Parse the client's value text as JSON (single quotes accepted)
    /// and bind it over an existing symbol.
    fn set_symbol_from_text(&mut self, name: &str, text: &str) -> Option<String> {
        let normalized = text.replace('\'', "\"");
        let json: Json = serde_json::from_str(&normalized).ok()?;
        let value = json_to_value(&json)?;
        let vm = self.interpreter.as_mut()?;
        if !vm.symbols().contains_key(name) {
            return None;
        }
        let rendered = match &value {
            Value::Str(s) => format!("'{s}'"),
            other => other.to_string(),
        };
        vm.set_symbol(name, Binding::Value(value));
        Some(rendered)
    }
}

fn render_binding(binding: &Binding) -> String {
    match binding {
        Binding::Value(Value::Str(s)) => format!("'{s}'"),
        other => other.to_string(),
    }
}

fn render_item(item: &Item) -> String {
    match item {
        Item::Token(token) => token.text.clone(),
        Item::Value(value) => value.to_string(),
        Item::Block(block) => block.to_string(),
    }
}

fn json_to_value(json: &Json) -> Option<Value> {
    match json {
        Json::Number(n) => n.as_i64().map(Value::Int),
        Json::String(s) => Some(Value::Str(s.clone())),
        Json::Array(items) => items
            .iter()
            .map(json_to_value)
            .collect::<Option<Vec<_>>>()
            .map(Value::List),
        _ => None,
    }
}

/// Zero-based line and column of a span's start, `(0, 0)` when there is
/// no source position.
fn line_column(source: &str, span: Option<Span>) -> (usize, usize) {
    let Some(span) = span else {
        return (0, 0);
    };
    let Some(upto) = source.get(..span.start) else {
        return (0, 0);
    };
    let line = upto.matches('\n').count();
    let column = upto.len() - upto.rfind('\n').map(|i| i + 1).unwrap_or(0);
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_column_counts_newlines() {
        let source = "12\n345\n6";
        assert_eq!(line_column(source, Some(Span::new(0, 1))), (0, 0));
        assert_eq!(line_column(source, Some(Span::new(4, 5))), (1, 1));
        assert_eq!(line_column(source, Some(Span::new(7, 8))), (2, 0));
    }

    #[test]
    fn test_line_column_without_span() {
        assert_eq!(line_column("abc", None), (0, 0));
    }

    #[test]
    fn test_json_to_value_conversions() {
        assert_eq!(json_to_value(&json!(5)), Some(Value::Int(5)));
        assert_eq!(json_to_value(&json!("x")), Some(Value::Str("x".into())));
        assert_eq!(
            json_to_value(&json!([1, 2])),
            Some(Value::List(vec![Value::Int(1), Value::Int(2)]))
        );
        assert_eq!(json_to_value(&json!(null)), None);
    }

    #[test]
    fn test_render_item_forms() {
        use crate::interp::Block;
        use crate::lexer::Token;
        assert_eq!(render_item(&Item::Token(Token::synthetic("+"))), "+");
        assert_eq!(render_item(&Item::Value(Value::Int(3))), "3");
        assert_eq!(
            render_item(&Item::Block(Block::from_source("1 2"))),
            "{1 2}"
        );
    }
}
