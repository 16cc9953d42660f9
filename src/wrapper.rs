//! Wrapper script generation.
//!
//! Every user fragment is wrapped in a PowerShell preamble/epilogue before it
//! reaches the interpreter's stdin. The wrapper's contract is what makes the
//! reply framing sound:
//!
//! 1. Output encoding is forced to UTF-8.
//! 2. The head and tail delimiters are stored as two halves in separate
//!    variables and only reassembled at emit time, so the wrapper source —
//!    which PowerShell may echo back on a parse error — never contains a
//!    literal framing sequence.
//! 3. The fragment runs with Success, Error, Warning and Information
//!    captured into variables, and Verbose/Debug redirected to scratch files
//!    (in-memory capture of those two streams is unreliable; they come back
//!    newline-delimited rather than item-delimited).
//! 4. A thrown exception is assigned to the error capture, so Error is never
//!    silently lost.
//! 5. A `finally` block reads and deletes the scratch files, assembles the
//!    envelope, and writes `HEAD + json + TAIL` to stdout in one expression —
//!    exactly one emission per command, even when the fragment throws.

use std::path::Path;

use crate::protocol::{Delimiters, OutputFormat};

/// Everything the wrapper needs to know about one command.
#[derive(Debug)]
pub struct WrapperSpec<'a> {
    /// The user's source fragment, embedded verbatim.
    pub fragment: &'a str,
    /// Delimiter pair for this child.
    pub delimiters: &'a Delimiters,
    /// Scratch file receiving the Verbose stream.
    pub verbose_path: &'a Path,
    /// Scratch file receiving the Debug stream.
    pub debug_path: &'a Path,
    /// Serialization of the Success stream.
    pub format: OutputFormat,
    /// Collect the Verbose stream (redirect to `$null` when false).
    pub collect_verbose: bool,
    /// Collect the Debug stream (redirect to `$null` when false).
    pub collect_debug: bool,
}

/// Build the PowerShell source for one command.
///
/// The returned script is written to the interpreter's stdin as a single
/// write; the interpreter executes it and emits exactly one framed envelope
/// on stdout.
pub fn build_wrapper(spec: &WrapperSpec<'_>) -> String {
    let (h0, h1) = spec.delimiters.head_halves();
    let (t0, t1) = spec.delimiters.tail_halves();

    let verbose_quoted = quote_single(&spec.verbose_path.display().to_string());
    let debug_quoted = quote_single(&spec.debug_path.display().to_string());

    let verbose_redirect = if spec.collect_verbose {
        format!("4>{verbose_quoted}")
    } else {
        "4>$null".to_string()
    };
    let debug_redirect = if spec.collect_debug {
        format!("5>{debug_quoted}")
    } else {
        "5>$null".to_string()
    };

    // Stream preferences gate what reaches the 4> and 5> redirections; they
    // track the collection flags so a disabled stream costs nothing.
    let verbose_preference = preference(spec.collect_verbose);
    let debug_preference = preference(spec.collect_debug);

    let success_expr = match spec.format {
        OutputFormat::Json => "ConvertTo-Json -InputObject @($ov) -Compress".to_string(),
        OutputFormat::String => out_string_json("$ov"),
        OutputFormat::None => "@($ov)".to_string(),
    };
    let format_literal = spec.format.wrapper_literal();
    let fragment = spec.fragment;

    let error_expr = out_string_json("$ev");
    let warning_expr = out_string_json("$wv");
    let verbose_expr = out_string_json("$vv");
    let debug_expr = out_string_json("$dv");
    let info_expr = out_string_json("$iv");

    format!(
        r#"$OutputEncoding = [Console]::OutputEncoding = [System.Text.Encoding]::UTF8
$VerbosePreference = '{verbose_preference}'
$DebugPreference = '{debug_preference}'
$h0 = '{h0}'
$h1 = '{h1}'
$t0 = '{t0}'
$t1 = '{t1}'
$ov = @()
$ev = @()
$wv = @()
$iv = @()
try {{
    Invoke-Command -NoNewScope -ScriptBlock {{
{fragment}
    }} -OutVariable ov -ErrorVariable ev -WarningVariable wv -InformationVariable iv {verbose_redirect} {debug_redirect} | Out-Null
}} catch {{
    $ev = @($_)
}} finally {{
    $vv = @()
    $dv = @()
    if (Test-Path -LiteralPath {verbose_quoted}) {{
        $vv = @(Get-Content -LiteralPath {verbose_quoted})
        Remove-Item -LiteralPath {verbose_quoted} -Force -ErrorAction SilentlyContinue
    }}
    if (Test-Path -LiteralPath {debug_quoted}) {{
        $dv = @(Get-Content -LiteralPath {debug_quoted})
        Remove-Item -LiteralPath {debug_quoted} -Force -ErrorAction SilentlyContinue
    }}
    $envelope = [ordered]@{{
        success = {success_expr}
        error = {error_expr}
        warning = {warning_expr}
        verbose = {verbose_expr}
        debug = {debug_expr}
        info = {info_expr}
        format = {format_literal}
    }}
    [Console]::Out.Write($h0 + $h1 + (ConvertTo-Json -InputObject @{{ result = $envelope }} -Depth 2 -Compress) + $t0 + $t1)
}}
"#
    )
}

fn preference(collect: bool) -> &'static str {
    if collect {
        "Continue"
    } else {
        "SilentlyContinue"
    }
}

/// `ConvertTo-Json` of an array variable with each item rendered through
/// `Out-String`.
fn out_string_json(var: &str) -> String {
    format!("ConvertTo-Json -InputObject @({var} | ForEach-Object {{ $_ | Out-String }}) -Compress")
}

/// Quote a value for embedding in single-quoted PowerShell string literals.
fn quote_single(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
