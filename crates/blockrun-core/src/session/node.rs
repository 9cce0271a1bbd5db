use super::{ReplDialect, string_literal};

/// Bootstrap for a prompt-less Node.js REPL that exits with its input.
const NODE_REPL_BOOTSTRAP: &str = r#"require("repl").start({prompt: "", preview: false, ignoreUndefined: true}).on("exit", ()=>process.exit())"#;

/// Node.js session.
#[derive(Debug, Default, Clone, Copy)]
pub struct NodeRepl;

impl ReplDialect for NodeRepl {
    fn launch_args(&self, configured: Vec<String>) -> Vec<String> {
        let mut args = vec!["-e".to_string(), NODE_REPL_BOOTSTRAP.to_string()];
        args.extend(configured);
        args
    }

    fn setup_input(&self) -> Option<String> {
        Some("\n".to_string())
    }

    fn wrap_code(&self, code: &str, sigil: &str) -> String {
        format!(
            "try {{ eval({}); }}catch(e) {{ console.error(e); }}finally {{ process.stdout.write({}); }}\n",
            string_literal(code),
            string_literal(sigil)
        )
    }
}
