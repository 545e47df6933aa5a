//! Parser for the C header declaration subset.
//!
//! Consumes the preprocessor's token stream and produces type
//! definitions: `struct`/`union` bodies with pointer, array, bitfield,
//! and nested-definition fields, `enum` bodies with constant-expression
//! values, and `typedef` aliases. Anything that is not one of those
//! declaration forms (function prototypes, `extern` variables, stray
//! macro remnants) is skipped token by token.
//!
//! Parsed definitions accumulate in a staging table that the caller
//! commits only after the whole header parsed cleanly.

use std::collections::{HashMap, VecDeque};

use indexmap::IndexMap;
use memview_core::{ArchInfo, ModuleId, NativeTypes};

use crate::error::{TypeError, TypeResult};
use crate::expr;
use crate::layout::{Resolved, TypeScope};
use crate::preprocess::Preprocessor;
use crate::registry::Registry;
use crate::token::{Token, TokenKind};
use crate::types::{Enumerant, FieldSpec, TypeDefinition};

/// Normalizes platform typedef spellings to C scalar names.
///
/// The non-zero second element is pointer depth the spelling implies
/// (`PVOID` is `void*`). Applied after typedef-alias chasing and before
/// the native-type lookup, so a header's own typedefs win over the
/// built-in table.
pub(crate) fn remap_platform_name(name: &str) -> Option<(&'static str, u32)> {
    let mapped = match name {
        "VOID" => ("void", 0),
        "CHAR" | "CCHAR" => ("char", 0),
        "UCHAR" | "BYTE" | "BOOLEAN" => ("unsigned char", 0),
        "SHORT" | "INT16" => ("short", 0),
        "USHORT" | "WORD" | "UINT16" => ("unsigned short", 0),
        "INT" | "BOOL" | "INT32" | "NTSTATUS" | "HRESULT" => ("int", 0),
        "LONG" => ("long", 0),
        "UINT" | "DWORD" | "UINT32" => ("unsigned int", 0),
        "ULONG" => ("unsigned long", 0),
        "LONGLONG" | "INT64" => ("long long", 0),
        "ULONGLONG" | "QWORD" | "DWORDLONG" | "DWORD64" | "UINT64" => ("unsigned long long", 0),
        "ULONG_PTR" | "UINT_PTR" | "SIZE_T" => ("size_t", 0),
        "LONG_PTR" | "INT_PTR" | "SSIZE_T" => ("ssize_t", 0),
        "WCHAR" => ("wchar_t", 0),
        "FLOAT" => ("float", 0),
        "DOUBLE" => ("double", 0),
        "PVOID" | "LPVOID" | "HANDLE" | "HMODULE" | "HWND" => ("void", 1),
        "PCHAR" | "PSTR" | "LPSTR" | "PCSTR" | "LPCSTR" => ("char", 1),
        "PWCHAR" | "PWSTR" | "LPWSTR" | "PCWSTR" | "LPCWSTR" => ("wchar_t", 1),
        "PUCHAR" | "PBYTE" => ("unsigned char", 1),
        "PSHORT" => ("short", 1),
        "PUSHORT" | "PWORD" => ("unsigned short", 1),
        "PINT" | "PBOOL" => ("int", 1),
        "PLONG" => ("long", 1),
        "PDWORD" | "PUINT" => ("unsigned int", 1),
        "PULONG" => ("unsigned long", 1),
        "PULONGLONG" | "PUINT64" => ("unsigned long long", 1),
        "PULONG_PTR" | "PSIZE_T" => ("size_t", 1),
        "PHANDLE" => ("void", 2),
        _ => return None,
    };
    Some(mapped)
}

/// Scalar specifier words that combine into multi-word type names.
const SCALAR_WORDS: &[&str] = &[
    "signed", "unsigned", "long", "short", "int", "char", "float", "double", "void", "bool",
    "_Bool",
];

pub struct HeaderParser<'a> {
    pre: Preprocessor,
    lookahead: VecDeque<Token>,
    staging: IndexMap<String, TypeDefinition>,
    arch: &'a ArchInfo,
    module: &'a ModuleId,
    natives: &'a dyn NativeTypes,
    registry: &'a Registry,
    /// Line of the most recently consumed token, for diagnostics.
    line: u32,
    unnamed: u32,
}

impl<'a> HeaderParser<'a> {
    pub fn new(
        source: &str,
        macros: HashMap<String, String>,
        arch: &'a ArchInfo,
        module: &'a ModuleId,
        natives: &'a dyn NativeTypes,
        registry: &'a Registry,
    ) -> TypeResult<Self> {
        Ok(Self {
            pre: Preprocessor::new(source, macros)?,
            lookahead: VecDeque::new(),
            staging: IndexMap::new(),
            arch,
            module,
            natives,
            registry,
            line: 1,
            unnamed: 0,
        })
    }

    /// Parses the whole header. Returns the staging table on success;
    /// any error discards everything.
    pub fn parse(mut self) -> TypeResult<IndexMap<String, TypeDefinition>> {
        loop {
            let Some(text) = self.peek_text(0)? else { break };
            match text.as_str() {
                "struct" | "union" => {
                    if self.definition_ahead()? {
                        self.parse_udt()?;
                        self.finish_statement()?;
                    } else {
                        self.next()?;
                    }
                }
                "enum" => {
                    if self.definition_ahead()? {
                        self.parse_enum()?;
                        self.finish_statement()?;
                    } else {
                        self.next()?;
                    }
                }
                "typedef" => self.parse_typedef()?,
                _ => {
                    self.next()?;
                }
            }
        }
        Ok(self.staging)
    }

    // --- token plumbing ---

    fn fill(&mut self, n: usize) -> TypeResult<()> {
        while self.lookahead.len() <= n {
            let scope = TypeScope {
                arch: self.arch,
                module: self.module,
                natives: self.natives,
                registry: self.registry,
                staging: Some(&self.staging),
            };
            match self.pre.next_token(&scope)? {
                Some(token) => self.lookahead.push_back(token),
                None => break,
            }
        }
        Ok(())
    }

    fn next(&mut self) -> TypeResult<Option<Token>> {
        self.fill(0)?;
        let token = self.lookahead.pop_front();
        if let Some(t) = &token {
            self.line = t.line;
        }
        Ok(token)
    }

    fn bump(&mut self) -> TypeResult<Token> {
        self.next()?
            .ok_or_else(|| TypeError::parse(self.line, "unexpected end of header"))
    }

    fn expect(&mut self, text: &str) -> TypeResult<Token> {
        let token = self.bump()?;
        if token.is(text) {
            Ok(token)
        } else {
            Err(TypeError::parse(
                token.line,
                format!("expected `{text}`, found `{}`", token.text),
            ))
        }
    }

    fn peek_text(&mut self, n: usize) -> TypeResult<Option<String>> {
        self.fill(n)?;
        Ok(self.lookahead.get(n).map(|t| t.text.clone()))
    }

    fn peek_is(&mut self, n: usize, text: &str) -> TypeResult<bool> {
        self.fill(n)?;
        Ok(self.lookahead.get(n).is_some_and(|t| t.is(text)))
    }

    fn peek_is_ident(&mut self, n: usize) -> TypeResult<bool> {
        self.fill(n)?;
        Ok(self.lookahead.get(n).is_some_and(|t| t.is_ident()))
    }

    fn scope(&self) -> TypeScope<'_> {
        TypeScope {
            arch: self.arch,
            module: self.module,
            natives: self.natives,
            registry: self.registry,
            staging: Some(&self.staging),
        }
    }

    /// After `struct`/`union`/`enum`: is a `{` body coming, possibly
    /// behind a tag name?
    fn definition_ahead(&mut self) -> TypeResult<bool> {
        self.fill(2)?;
        Ok(match (self.lookahead.get(1), self.lookahead.get(2)) {
            (Some(t1), _) if t1.is("{") => true,
            (Some(t1), Some(t2)) => t1.is_ident() && t2.is("{"),
            _ => false,
        })
    }

    /// Skips trailing declarators after a top-level definition, through
    /// the terminating `;`.
    fn finish_statement(&mut self) -> TypeResult<()> {
        loop {
            match self.next()? {
                Some(t) if t.is(";") => return Ok(()),
                Some(_) => continue,
                None => {
                    return Err(TypeError::parse(self.line, "expected `;` after definition"))
                }
            }
        }
    }

    fn skip_qualifiers(&mut self) -> TypeResult<()> {
        while self.peek_is(0, "const")? || self.peek_is(0, "volatile")? {
            self.next()?;
        }
        Ok(())
    }

    fn fresh_unnamed(&mut self, kind: &str) -> String {
        self.unnamed += 1;
        format!("__UNNAMED_{kind}_{}", self.unnamed)
    }

    fn register(&mut self, def: TypeDefinition) -> TypeResult<()> {
        if self.staging.contains_key(&def.name) || self.registry.contains(&def.name) {
            return Err(TypeError::parse(
                self.line,
                format!("redefinition of type `{}`", def.name),
            ));
        }
        self.staging.insert(def.name.clone(), def);
        Ok(())
    }

    // --- declarations ---

    /// `struct`/`union` definition with body. Registers the definition
    /// and returns its name; the caller handles trailing declarators.
    fn parse_udt(&mut self) -> TypeResult<String> {
        let kw = self.bump()?;
        let is_union = kw.is("union");
        let name = if self.peek_is_ident(0)? {
            self.bump()?.text
        } else {
            self.fresh_unnamed(if is_union { "union" } else { "struct" })
        };
        self.expect("{")?;
        let mut def = if is_union {
            TypeDefinition::new_union(&name)
        } else {
            TypeDefinition::new_struct(&name)
        };
        loop {
            match self.peek_text(0)? {
                None => {
                    return Err(TypeError::parse(
                        self.line,
                        format!("unterminated definition of `{name}`"),
                    ))
                }
                Some(t) if t == "}" => break,
                Some(_) => self.parse_field(&mut def)?,
            }
        }
        self.expect("}")?;
        self.register(def)?;
        Ok(name)
    }

    /// One field declaration inside a struct/union body, possibly with
    /// several comma-separated declarators.
    fn parse_field(&mut self, def: &mut TypeDefinition) -> TypeResult<()> {
        let head = self.peek_text(0)?.unwrap_or_default();
        let (type_name, native, extra_depth) = match head.as_str() {
            "struct" | "union" if self.definition_ahead()? => (self.parse_udt()?, false, 0),
            "enum" if self.definition_ahead()? => (self.parse_enum()?, false, 0),
            _ => self.parse_type_name()?,
        };
        loop {
            let mut field = self.parse_declarator(type_name.clone(), native)?;
            field.pointer_depth += extra_depth;
            if field.pointer_depth > 0
                && (field.array_length.is_some() || field.bit_length.is_some())
            {
                return Err(TypeError::parse(
                    self.line,
                    "pointer fields cannot also be arrays or bitfields",
                ));
            }
            if field.name.is_none() && field.bit_length.is_none() {
                // Nameless non-bitfield: only meaningful as an anonymous
                // embedded struct/union whose members get flattened.
                if field.native || field.pointer_depth > 0 || field.array_length.is_some() {
                    return Err(TypeError::parse(self.line, "expected field name"));
                }
                field.embedded = true;
            }
            def.fields.push(field);
            if self.peek_is(0, ",")? {
                self.bump()?;
                continue;
            }
            self.expect(";")?;
            return Ok(());
        }
    }

    /// One declarator: leading stars, optional name, optional array or
    /// bitfield suffix. Does not consume the `,` or `;` that follows.
    fn parse_declarator(&mut self, type_name: String, native: bool) -> TypeResult<FieldSpec> {
        let mut depth = 0u32;
        while self.peek_is(0, "*")? {
            self.bump()?;
            depth += 1;
            self.skip_qualifiers()?;
        }
        let name = if self.peek_is_ident(0)? {
            Some(self.bump()?.text)
        } else {
            None
        };
        let mut field = FieldSpec {
            type_name,
            native,
            name,
            array_length: None,
            pointer_depth: depth,
            bit_length: None,
            embedded: false,
        };
        if self.peek_is(0, "[")? {
            self.bump()?;
            let tokens = self.collect_until_bracket()?;
            let value = self.eval_const(&tokens)?;
            if value < 0 {
                return Err(TypeError::parse(self.line, "negative array length"));
            }
            field.array_length = Some(value as usize);
        } else if self.peek_is(0, ":")? {
            self.bump()?;
            let t = self.bump()?;
            match (t.kind, t.value) {
                (TokenKind::Int, Some(v)) if v >= 0 => field.bit_length = Some(v as u32),
                _ => {
                    return Err(TypeError::parse(
                        t.line,
                        format!("expected bitfield width, found `{}`", t.text),
                    ))
                }
            }
        }
        Ok(field)
    }

    /// Collects the tokens of an array-length expression, consuming the
    /// closing `]`.
    fn collect_until_bracket(&mut self) -> TypeResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let t = self.bump()?;
            if t.is("]") {
                return Ok(tokens);
            }
            tokens.push(t);
        }
    }

    /// Evaluates a collected constant expression against the staging
    /// table and registry; every token must be consumed.
    fn eval_const(&self, tokens: &[Token]) -> TypeResult<i64> {
        let mut pos = 0;
        let scope = self.scope();
        let value = expr::evaluate(tokens, &mut pos, &scope, None)?;
        if pos < tokens.len() {
            return Err(TypeError::parse(
                tokens[pos].line,
                format!("unexpected `{}` in constant expression", tokens[pos].text),
            ));
        }
        Ok(value)
    }

    /// A type name in field or typedef position: scalar specifier words,
    /// a `struct`/`union`/`enum` tag reference, or a bare identifier.
    /// Chases typedef aliases and platform remaps to classify the result;
    /// unknown names pass through for later (possibly forward) resolution.
    fn parse_type_name(&mut self) -> TypeResult<(String, bool, u32)> {
        self.skip_qualifiers()?;
        let mut words: Vec<String> = Vec::new();
        loop {
            match self.peek_text(0)? {
                Some(w) if SCALAR_WORDS.contains(&w.as_str()) => {
                    words.push(self.bump()?.text);
                    self.skip_qualifiers()?;
                }
                _ => break,
            }
        }
        let raw = if !words.is_empty() {
            // `int` is redundant next to short/long specifiers.
            if words.len() > 1 && words.iter().any(|w| w == "long" || w == "short") {
                words.retain(|w| w != "int");
            }
            words.join(" ")
        } else {
            let t = self.bump()?;
            if t.is("struct") || t.is("union") || t.is("enum") {
                let tag = self.bump()?;
                tag.ident()
                    .ok_or_else(|| {
                        TypeError::parse(
                            tag.line,
                            format!("expected tag name, found `{}`", tag.text),
                        )
                    })?
                    .to_string()
            } else if t.is_ident() {
                t.text
            } else {
                return Err(TypeError::parse(
                    t.line,
                    format!("expected type name, found `{}`", t.text),
                ));
            }
        };
        self.skip_qualifiers()?;
        match self.scope().resolve(&raw)? {
            Resolved::Synthetic(def) => Ok((def.name.clone(), false, 0)),
            Resolved::Pointer { pointee, depth } => Ok((pointee, false, depth)),
            Resolved::Native(_) => Ok((raw, true, 0)),
            // Possibly a forward reference within this header.
            Resolved::Unknown => Ok((raw, false, 0)),
        }
    }

    /// `enum` definition with body. The definition is registered before
    /// the body is parsed so that later enumerants (and later types in
    /// the same header) can reference earlier ones.
    fn parse_enum(&mut self) -> TypeResult<String> {
        self.bump()?;
        let name = if self.peek_is_ident(0)? {
            self.bump()?.text
        } else {
            self.fresh_unnamed("enum")
        };
        self.expect("{")?;
        self.register(TypeDefinition::new_enum(&name))?;
        let mut next_value = 0i64;
        loop {
            if self.peek_is(0, "}")? {
                break;
            }
            let t = self.bump()?;
            let enumerant = t
                .ident()
                .ok_or_else(|| {
                    TypeError::parse(
                        t.line,
                        format!("expected enumerant name, found `{}`", t.text),
                    )
                })?
                .to_string();
            let value = if self.peek_is(0, "=")? {
                self.bump()?;
                let tokens = self.collect_enum_expr()?;
                self.eval_const(&tokens)?
            } else {
                next_value
            };
            if let Some(def) = self.staging.get_mut(&name) {
                def.enumerants.push(Enumerant {
                    name: enumerant,
                    value,
                });
            }
            next_value = value + 1;
            if self.peek_is(0, ",")? {
                self.bump()?;
            }
        }
        self.expect("}")?;
        Ok(name)
    }

    /// Collects an enumerant value expression up to the next top-level
    /// `,` or `}`, leaving the terminator in place.
    fn collect_enum_expr(&mut self) -> TypeResult<Vec<Token>> {
        let mut tokens = Vec::new();
        let mut parens = 0i32;
        loop {
            self.fill(0)?;
            match self.lookahead.front() {
                None => return Err(TypeError::parse(self.line, "unterminated enum body")),
                Some(t) if parens == 0 && (t.is(",") || t.is("}")) => return Ok(tokens),
                Some(t) => {
                    if t.is("(") {
                        parens += 1;
                    } else if t.is(")") {
                        parens -= 1;
                    }
                }
            }
            tokens.push(self.bump()?);
        }
    }

    /// `typedef <base> <alias> (, <alias>)* ;` where base may itself be
    /// an inline struct/union/enum definition.
    fn parse_typedef(&mut self) -> TypeResult<()> {
        self.bump()?;
        let head = self.peek_text(0)?.unwrap_or_default();
        let (base, base_depth) = match head.as_str() {
            "struct" | "union" if self.definition_ahead()? => (self.parse_udt()?, 0),
            "enum" if self.definition_ahead()? => (self.parse_enum()?, 0),
            _ => {
                let (name, _native, depth) = self.parse_type_name()?;
                (name, depth)
            }
        };
        loop {
            let mut depth = base_depth;
            while self.peek_is(0, "*")? {
                self.bump()?;
                depth += 1;
                self.skip_qualifiers()?;
            }
            let t = self.bump()?;
            let alias = t
                .ident()
                .ok_or_else(|| {
                    TypeError::parse(
                        t.line,
                        format!("expected typedef name, found `{}`", t.text),
                    )
                })?
                .to_string();
            // `typedef struct Node Node;` introduces nothing new.
            if !(alias == base && depth == 0) {
                self.register(TypeDefinition::new_alias(&alias, &base, depth))?;
            }
            if self.peek_is(0, ",")? {
                self.bump()?;
                continue;
            }
            self.expect(";")?;
            return Ok(());
        }
    }
}
