/// Parser for `info functions` / `info variables` listings
/// 
/// GDB prints debugging symbols grouped per source file, followed by the
/// linker symbols without debugging information:
///
/// ```text
/// All defined functions:
///
/// File t.c:
/// 3:	int main(void);
///
/// Non-debugging symbols:
/// 0x0000000000001000  _init
/// ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::handler::{check_result, Feed, ResponseHandler};
use crate::symbols::{SharedSymbolTable, Symbol, SymbolKind, SymbolSource};
use crate::types::{GdbOutput, OutputLine, StreamType};
use crate::TargetError;

static SECTION_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:All (?:defined )?(?:functions|variables)(?: matching .*)?|Non-debugging symbols):$")
        .expect("section header pattern is valid")
});

static FILE_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^File (.+):$").expect("file header pattern is valid")
});

static DEBUGGING_SYMBOL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(\d+):)?\s*(\S.*);$").expect("debugging symbol pattern is valid")
});

static LINKER_SYMBOL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^0x([0-9a-fA-F]+)\s+(\S.*)$").expect("linker symbol pattern is valid")
});

/// Completion callback, called once with the number of distinct symbols listed
pub type ListingCallback = Box<dyn FnOnce(usize) + Send>;

/// Fills a [`SymbolTable`](crate::SymbolTable) from a symbol listing
pub struct SymbolListingHandler {
    kind: SymbolKind,
    symbols: SharedSymbolTable,
    callback: Option<ListingCallback>,
    current_file: Option<String>,
    seen: HashSet<String>,
    result_seen: bool,
}

impl SymbolListingHandler {
    pub fn new(kind: SymbolKind, symbols: SharedSymbolTable, callback: ListingCallback) -> Self {
        Self {
            kind,
            symbols,
            callback: Some(callback),
            current_file: None,
            seen: HashSet::new(),
            result_seen: false,
        }
    }
    
    fn consume_line(&mut self, line: &str) -> Result<(), TargetError> {
        if line.trim().is_empty() || SECTION_HEADER.is_match(line) {
            if line.starts_with("Non-debugging") {
                self.current_file = None;
            }
            return Ok(());
        }
        
        if let Some(caps) = FILE_HEADER.captures(line) {
            self.current_file = Some(caps[1].to_string());
            return Ok(());
        }
        
        let symbol = if let Some(caps) = LINKER_SYMBOL.captures(line) {
            let address = u64::from_str_radix(&caps[1], 16).map_err(|_| TargetError::protocol(line))?;
            Symbol {
                name: caps[2].trim().to_string(),
                kind: self.kind,
                source: SymbolSource::NonDebugging,
                address: Some(address),
                file: None,
                line: None,
                declaration: None,
            }
        } else if let Some(caps) = DEBUGGING_SYMBOL.captures(line) {
            let declaration = caps[2].trim();
            let name = match self.kind {
                SymbolKind::Function => function_name(declaration),
                SymbolKind::Variable => variable_name(declaration),
            }
            .ok_or_else(|| TargetError::protocol(line))?;
            Symbol {
                name: name.to_string(),
                kind: self.kind,
                source: SymbolSource::Debugging,
                address: None,
                file: self.current_file.clone(),
                line: caps.get(1).and_then(|m| m.as_str().parse().ok()),
                declaration: Some(declaration.to_string()),
            }
        } else {
            return Err(TargetError::protocol(line));
        };
        
        self.seen.insert(symbol.name.clone());
        self.symbols
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(symbol);
        Ok(())
    }
    
    fn finish(&mut self) -> usize {
        let count = self.seen.len();
        if let Some(callback) = self.callback.take() {
            callback(count);
        }
        count
    }
}

impl ResponseHandler for SymbolListingHandler {
    type Output = usize;

    fn feed(&mut self, line: &OutputLine) -> Feed<usize> {
        match line {
            OutputLine::Record(GdbOutput::Stream(stream)) if stream.stream_type == StreamType::Console => {
                for text in stream.content.split('\n') {
                    if let Err(e) = self.consume_line(text) {
                        return Feed::Error(e);
                    }
                }
                Feed::NeedMore
            }
            OutputLine::Record(GdbOutput::Result(result)) => match check_result(result) {
                Ok(()) => {
                    self.result_seen = true;
                    Feed::NeedMore
                }
                Err(e) => Feed::Error(e),
            },
            OutputLine::Prompt if self.result_seen => Feed::Done(self.finish()),
            _ => Feed::NeedMore,
        }
    }
}

/// `static int helper(int)` -> `helper`
fn function_name(declaration: &str) -> Option<&str> {
    let head = declaration.split('(').next()?.trim_end();
    let name = head.rsplit(char::is_whitespace).next()?;
    let name = name.trim_start_matches(['*', '&']);
    (!name.is_empty()).then_some(name)
}

/// `static char *names[4]` -> `names`, `int (*handler)(int)` -> `handler`
fn variable_name(declaration: &str) -> Option<&str> {
    if let Some(start) = declaration.find("(*") {
        let rest = &declaration[start + 2..];
        let name = &rest[..rest.find(')')?];
        return (!name.is_empty()).then_some(name.trim());
    }
    let head = declaration.split('[').next()?.trim_end();
    let name = head.rsplit(char::is_whitespace).next()?;
    let name = name.trim_start_matches(['*', '&']);
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_output_line;
    use crate::symbols::SymbolTable;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn run(handler: &mut SymbolListingHandler, lines: &[&str]) -> Feed<usize> {
        for line in lines {
            match handler.feed(&parse_output_line(line).unwrap()) {
                Feed::NeedMore => continue,
                other => return other,
            }
        }
        Feed::NeedMore
    }

    #[test]
    fn test_names_from_declarations() {
        assert_eq!(function_name("int main(void)"), Some("main"));
        assert_eq!(function_name("static void *worker(void *)"), Some("worker"));
        assert_eq!(function_name("void ns::Parser::feed(char const*)"), Some("ns::Parser::feed"));
        assert_eq!(variable_name("static const char *names[4]"), Some("names"));
        assert_eq!(variable_name("int (*handler)(int)"), Some("handler"));
        assert_eq!(variable_name("int counter"), Some("counter"));
    }

    #[test]
    fn test_listing_fills_table_once_per_name() {
        let table = SymbolTable::shared();
        let calls = Arc::new(AtomicUsize::new(0));
        let reported = Arc::new(AtomicUsize::new(0));
        let (c, r) = (calls.clone(), reported.clone());
        let mut handler = SymbolListingHandler::new(
            SymbolKind::Function,
            table.clone(),
            Box::new(move |count| {
                c.fetch_add(1, Ordering::SeqCst);
                r.store(count, Ordering::SeqCst);
            }),
        );

        let outcome = run(&mut handler, &[
            r#"~"All defined functions:\n""#,
            r#"~"\nFile t.c:\n""#,
            r#"~"1:\tstatic int helper(int);\n3:\tint main(void);\n""#,
            r#"~"\nNon-debugging symbols:\n""#,
            r#"~"0x0000000000001000  _init\n""#,
            r#"~"0x0000000000001130  helper\n""#,
            r#"~"0x0000000000001000  _init\n""#,
            "5^done",
            "(gdb) ",
        ]);

        assert!(matches!(outcome, Feed::Done(3)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(reported.load(Ordering::SeqCst), 3);

        let table = table.read().unwrap();
        assert_eq!(table.len(), 3);
        let helper = table.get("helper").unwrap();
        assert_eq!(helper.source, SymbolSource::Debugging);
        assert_eq!(helper.file.as_deref(), Some("t.c"));
        assert_eq!(helper.line, Some(1));
        assert_eq!(table.get("_init").unwrap().address, Some(0x1000));
    }

    #[test]
    fn test_declaration_without_line_number() {
        let table = SymbolTable::shared();
        let mut handler = SymbolListingHandler::new(SymbolKind::Function, table.clone(), Box::new(|_| {}));
        let outcome = run(&mut handler, &[
            r#"~"All defined functions:\n""#,
            r#"~"\nFile crt.c:\n""#,
            r#"~"int main(void);\n""#,
            r#"~"\tstatic void _start(void);\n""#,
            "4^done",
            "(gdb)",
        ]);
        assert!(matches!(outcome, Feed::Done(2)));

        let table = table.read().unwrap();
        let main = table.get("main").unwrap();
        assert_eq!(main.source, SymbolSource::Debugging);
        assert_eq!(main.line, None);
        assert_eq!(main.file.as_deref(), Some("crt.c"));
        assert!(table.get("_start").is_some());
    }

    #[test]
    fn test_unknown_line_is_protocol_error() {
        let mut handler = SymbolListingHandler::new(SymbolKind::Function, SymbolTable::shared(), Box::new(|_| {}));
        match run(&mut handler, &[r#"~"All defined functions:\n""#, r#"~"garbage\n""#]) {
            Feed::Error(TargetError::ProtocolError { line }) => assert_eq!(line, "garbage"),
            other => panic!("Expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_log_echo_is_ignored() {
        let mut handler = SymbolListingHandler::new(SymbolKind::Variable, SymbolTable::shared(), Box::new(|_| {}));
        let outcome = run(&mut handler, &[
            r#"&"info variables\n""#,
            r#"~"All defined variables:\n""#,
            r#"~"\nFile t.c:\n""#,
            r#"~"2:\tint counter;\n""#,
            "8^done",
            "(gdb)",
        ]);
        assert!(matches!(outcome, Feed::Done(1)));
    }
}
