use uuid::Uuid;

use super::{ReplDialect, string_literal};

/// R session.
///
/// `Rscript` has no REPL of its own, so the launch expression is a minimal
/// read-eval loop over stdin. Printing is left to the wrapped code, which
/// has to emit the sigil anyway.
#[derive(Debug, Clone)]
pub struct RRepl {
    connection: String,
}

impl Default for RRepl {
    fn default() -> Self {
        Self::new()
    }
}

impl RRepl {
    pub fn new() -> Self {
        Self {
            connection: format!("notebook_connection_{}", Uuid::new_v4().simple()),
        }
    }
}

impl ReplDialect for RRepl {
    fn launch_args(&self, configured: Vec<String>) -> Vec<String> {
        let read_eval = format!(
            r#"{conn}=file("stdin", "r"); while(1) {{ eval(parse(text=tail(readLines(con = {conn}, n=1)))) }}"#,
            conn = self.connection
        );
        let mut args = vec!["-e".to_string(), read_eval];
        args.extend(configured);
        args
    }

    fn wrap_code(&self, code: &str, sigil: &str) -> String {
        // The loop reads one line per expression.
        format!(
            "tryCatch({{cat(sprintf(\"%s\", eval(parse(text = {} ))))}}, error = function(e){{cat(sprintf(\"%s\", e), file=stderr())}}, finally = {{cat({sigil}, file=stderr());cat({sigil});flush.console()}})\n",
            string_literal(code),
            sigil = string_literal(sigil)
        )
    }

    fn fences_stderr(&self) -> bool {
        true
    }
}
