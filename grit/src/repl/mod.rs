//! REPL (Read-Eval-Print Loop) for Grit

use rustyline::error::ReadlineError;
use rustyline::{DefaultEditor, Result as RlResult};

use crate::interp::{Interpreter, Value};

const PROMPT: &str = "> ";

/// REPL state: one interpreter whose stack and symbols survive across
/// input lines.
pub struct Repl {
    editor: DefaultEditor,
    interpreter: Interpreter,
}

impl Repl {
    /// Create a new REPL
    pub fn new() -> RlResult<Self> {
        Ok(Repl {
            editor: DefaultEditor::new()?,
            interpreter: Interpreter::new(""),
        })
    }

    /// Run the REPL
    pub fn run(&mut self) -> RlResult<()> {
        println!("Grit REPL");
        println!("The stack prints after every line. Type :help for help, :quit to exit.\n");

        loop {
            match self.editor.readline(PROMPT) {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let _ = self.editor.add_history_entry(&line);

                    if line.trim_start().starts_with(':') {
                        if self.handle_command(line.trim()) {
                            break;
                        }
                        continue;
                    }

                    self.eval_line(&line);
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!("Goodbye!");
                    break;
                }
                Err(err) => {
                    eprintln!("Error: {err}");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle REPL commands (starting with :)
    fn handle_command(&mut self, cmd: &str) -> bool {
        match cmd {
            ":quit" | ":q" | ":exit" => {
                println!("Goodbye!");
                true
            }
            ":help" | ":h" | ":?" => {
                self.print_help();
                false
            }
            ":clear" => {
                self.interpreter = Interpreter::new("");
                false
            }
            _ => {
                println!("Unknown command: {cmd}");
                println!("Type :help for help.");
                false
            }
        }
    }

    fn print_help(&self) {
        println!("Grit REPL Commands:");
        println!("  :help, :h, :?   Show this help");
        println!("  :quit, :q       Exit the REPL");
        println!("  :clear          Reset the stack and symbols");
        println!();
        println!("Enter Grit code; each line runs against the same stack:");
        println!("  5 7+            push 5 and 7, add");
        println!("  {{2*}}:double;    name a block");
        println!("  [1 2 3]{{1+}}/   map a block over a list");
    }

    fn eval_line(&mut self, line: &str) {
        self.interpreter.load(line);
        match self.interpreter.execute_all() {
            Ok(stack) => println!("{}", Value::List(stack)),
            Err(e) => {
                eprintln!("error: {e}");
                // drop the frames the failed line left behind
                self.interpreter.halt();
            }
        }
    }
}
