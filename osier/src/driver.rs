//! The driver: owns every pool and runs the pipeline.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use osier_asm::{GlobalFileIndex, OpcodeId, OpcodePool};
use osier_pool::IdentifierPool;
use osier_syntax::{parse, print_ast, tokenize, AstPool};
use osier_types::TypePool;
use tracing::{debug, info, warn};

use crate::config::{load_config, Config, ConfigError};
use crate::diag::ErrorSink;
use crate::lower::Lowerer;
use crate::source::{SourceFileId, SourceReader};

/// Failure constructing the driver or locating its inputs.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Configuration problems are fatal at load.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The compilation has no input file.
    #[error("no source file: pass one on the command line or set entrypoint.filepath")]
    NoInput,
    /// Host I/O failure.
    #[error("could not read {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
}

/// Everything a compilation owns.
///
/// Pools are created together and dropped together; ids handed out by one
/// pool are only meaningful against this instance.
pub struct CoreData {
    /// Parsed configuration.
    pub config: Config,
    /// Identifier interner.
    pub identifiers: IdentifierPool,
    /// Decoded string-literal values, interned by identity.
    pub strings: IdentifierPool,
    /// AST storage.
    pub asts: AstPool,
    /// Type pool.
    pub types: TypePool,
    /// Opcode pool.
    pub opcodes: OpcodePool,
    /// Loaded sources.
    pub sources: SourceReader,
    /// Collected diagnostics.
    pub errors: ErrorSink,
}

/// Instantiates every pool, loading the configuration from `config_path`
/// when given.
pub fn create_core_data(config_path: Option<&Path>) -> Result<CoreData, DriverError> {
    let config = match config_path {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };

    if config.logging.config.enable {
        info!(?config, "loaded configuration");
    }

    Ok(CoreData {
        config,
        identifiers: IdentifierPool::new(),
        strings: IdentifierPool::new(),
        asts: AstPool::new(),
        types: TypePool::new(),
        opcodes: OpcodePool::new(),
        sources: SourceReader::new(),
        errors: ErrorSink::new(),
    })
}

/// Tears the core down. Pools release their reservations on drop, in reverse
/// creation order.
pub fn release_core_data(core: CoreData) {
    drop(core);
}

fn log_target(path: Option<&Path>) -> io::Result<Box<dyn Write>> {
    match path {
        Some(path) => Ok(Box::new(fs::File::create(path)?)),
        None => Ok(Box::new(io::stdout().lock())),
    }
}

/// Compiles one already-loaded source file: tokens, AST, opcode streams.
///
/// Returns the entry stream on success; on failure, diagnostics land in the
/// error sink and `None` is returned.
pub fn compile_file(core: &mut CoreData, file: SourceFileId) -> Option<OpcodeId> {
    let file_base = core.sources.base(file);

    let bytes = core.sources.bytes(file).to_vec();

    let tokens = tokenize(&bytes, false);

    debug!(tokens = tokens.len(), "lexed");

    let root = match parse(
        &tokens,
        &bytes,
        &mut core.identifiers,
        &mut core.strings,
        &mut core.asts,
    ) {
        Ok(root) => root,
        Err(error) => {
            core.errors
                .report_parse_error(&core.sources, file_base, &error);

            return None;
        }
    };

    // One handle serves both the AST dump and the opcode dump, so a
    // configured log file holds the whole picture for the compilation.
    let mut log = if core.config.logging.asts.enable {
        match log_target(core.config.logging.asts.log_file.as_deref()) {
            Ok(out) => Some(out),
            Err(error) => {
                warn!(%error, "could not open the AST log target");

                None
            }
        }
    } else {
        None
    };

    if let Some(out) = log.as_mut() {
        let print = print_ast(out, &core.asts, root, &core.identifiers, &core.strings);

        if let Err(error) = print {
            warn!(%error, "could not write the AST log");
        }
    }

    let file_index = GlobalFileIndex::from_raw(file.to_raw() as u16);

    let mut lowerer = Lowerer::new(
        &mut core.asts,
        &mut core.identifiers,
        &mut core.types,
        &mut core.opcodes,
        file_index,
    );

    let entry = match lowerer.lower_file(root) {
        Ok(entry) => entry,
        Err(error) => {
            core.errors.report(None, "Lower", error.to_string());

            return None;
        }
    };

    if let Some(out) = log.as_mut() {
        let print = writeln!(out).and_then(|()| {
            osier_asm::print_opcodes(out, &core.identifiers, &core.opcodes, entry, true)
        });

        if let Err(error) = print {
            warn!(%error, "could not write the opcode log");
        }
    }

    debug!(
        opcode_bytes = core.opcodes.used_bytes(),
        types = core.types.len(),
        identifiers = core.identifiers.len(),
        "lowered"
    );

    Some(entry)
}

/// Runs the whole pipeline for the configured input.
///
/// With `is_std_mode`, `std.filepath` is compiled instead of the entry
/// point. Returns `false` on any failure; diagnostics are in
/// [`CoreData::errors`].
pub fn run_compilation(core: &mut CoreData, is_std_mode: bool) -> bool {
    let path = if is_std_mode {
        core.config.std.filepath.clone()
    } else {
        core.config.entrypoint.filepath.clone()
    };

    let Some(path) = path else {
        core.errors
            .report(None, "Driver", DriverError::NoInput.to_string());

        return false;
    };

    if core.config.logging.imports.enable {
        info!(
            prelude = core.config.logging.imports.enable_prelude,
            "import logging requested; single-file compilation performs no imports"
        );
    }

    let file = match core.sources.add_file(&path) {
        Ok(file) => file,
        Err(error) => {
            let error = DriverError::Io {
                path: path.clone(),
                source: error,
            };

            core.errors.report(None, "Driver", error.to_string());

            return false;
        }
    };

    info!(path = %path.display(), "compiling");

    compile_file(core, file).is_some() && !core.errors.has_errors()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{compile_file, create_core_data};

    #[test]
    fn missing_input_fails_with_diagnostic() {
        let mut core = create_core_data(None).expect("core builds");

        assert!(!super::run_compilation(&mut core, false));
        assert!(core.errors.has_errors());
    }

    #[test]
    fn compile_file_reports_parse_errors() {
        let mut core = create_core_data(None).expect("core builds");

        let file = core
            .sources
            .add_bytes(PathBuf::from("broken.osi"), b"x :: /* nope".to_vec());

        assert!(compile_file(&mut core, file).is_none());
        assert!(core.errors.has_errors());
    }
}
