//! Line templates for planned commands.
//!
//! A template is plain text with `{name}` placeholders; `{{` and `}}` stand
//! for literal braces. Templates are compiled once, so rendering never fails.


use crate::common::{ImageTriplet, RecordKey, Role};
use crate::error::TemplateError;

/// Values that may appear in a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Study,
    Sample,
    Visit,
    Role,
    Measurement,
    Xt2Host,
    ArcHost,
    Xt2Root,
    ArcDir,
    LocalDir,
}

impl Field {
    pub const ALL: [Field; 10] = [
        Field::Study,
        Field::Sample,
        Field::Visit,
        Field::Role,
        Field::Measurement,
        Field::Xt2Host,
        Field::ArcHost,
        Field::Xt2Root,
        Field::ArcDir,
        Field::LocalDir,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::Study => "study",
            Field::Sample => "sample",
            Field::Visit => "visit",
            Field::Role => "role",
            Field::Measurement => "measurement",
            Field::Xt2Host => "xt2_host",
            Field::ArcHost => "arc_host",
            Field::Xt2Root => "xt2_root",
            Field::ArcDir => "arc_dir",
            Field::LocalDir => "local_dir",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }
}

/// Run-wide values substituted into every line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanVars {
    pub xt2_host: String,
    pub arc_host: String,
    pub xt2_root: String,
    pub arc_dir: String,
    pub local_dir: String,
}

/// The `(record, visit, role)` a line is rendered for.
#[derive(Debug, Clone, Copy)]
pub struct LineContext<'a> {
    pub key: &'a RecordKey,
    pub visit: usize,
    pub role: Role,
    pub triplet: &'a ImageTriplet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Field),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineTemplate {
    name: String,
    segments: Vec<Segment>,
}

impl LineTemplate {
    /// Compiles `source`. `name` is only used in error messages and logs.
    pub fn parse(name: &str, source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((offset, ch)) = chars.next() {
            match ch {
                '{' if chars.peek().map(|&(_, c)| c) == Some('{') => {
                    chars.next();
                    literal.push('{');
                }
                '{' => {
                    let mut field_name = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        field_name.push(c);
                    }
                    if !closed {
                        return Err(TemplateError::UnclosedPlaceholder {
                            template: name.to_owned(),
                            offset,
                        });
                    }
                    let field = Field::from_name(field_name.trim()).ok_or_else(|| {
                        TemplateError::UnknownPlaceholder {
                            template: name.to_owned(),
                            name: field_name.clone(),
                        }
                    })?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(field));
                }
                '}' if chars.peek().map(|&(_, c)| c) == Some('}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => {
                    return Err(TemplateError::UnmatchedBrace {
                        template: name.to_owned(),
                        offset,
                    })
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            name: name.to_owned(),
            segments,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn render(&self, line: &LineContext<'_>, vars: &PlanVars) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(field) => match field {
                    Field::Study => out.push_str(&line.key.study_id),
                    Field::Sample => out.push_str(&line.key.sample_id),
                    Field::Visit => out.push_str(&line.visit.to_string()),
                    Field::Role => out.push_str(line.role.as_str()),
                    Field::Measurement => out.push_str(line.triplet.get(line.role)),
                    Field::Xt2Host => out.push_str(&vars.xt2_host),
                    Field::ArcHost => out.push_str(&vars.arc_host),
                    Field::Xt2Root => out.push_str(&vars.xt2_root),
                    Field::ArcDir => out.push_str(&vars.arc_dir),
                    Field::LocalDir => out.push_str(&vars.local_dir),
                },
            }
        }
        out
    }
}
