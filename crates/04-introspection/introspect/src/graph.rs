use std::collections::HashMap;
use std::io::{self, Write};

use context::Context;
use dispatch::{ContextDispatchExt, FilterArgument, FilterDescriptor};
use identity::TypeIdentity;

/// Writes the filter/decoration graph visible from `context` in DOT format.
///
/// Every filter and every decoration type gets one node, numbered in order of
/// first appearance. Inputs point decoration to filter, outputs filter to
/// decoration; in/out edges are bidirectional and time-shifted edges dotted.
pub fn write_dependency_graph<W: Write>(out: &mut W, context: &Context) -> io::Result<()> {
    let mut scope = DigraphScope::open(out, context.name())?;
    if let Some(factory) = context.find_packet_factory() {
        write_body(scope.out(), &factory.registry().descriptors())?;
    }
    scope.close()
}

pub fn dependency_graph_string(context: &Context) -> String {
    let mut buf = Vec::new();
    write_dependency_graph(&mut buf, context).expect("writing to a Vec cannot fail");
    String::from_utf8_lossy(&buf).into_owned()
}

/// Opening line on creation, closing brace on close or drop.
struct DigraphScope<'a, W: Write> {
    out: &'a mut W,
    closed: bool,
}

impl<'a, W: Write> DigraphScope<'a, W> {
    fn open(out: &'a mut W, name: &str) -> io::Result<Self> {
        writeln!(out, "digraph {} {{", dot_id(name))?;
        Ok(Self { out, closed: false })
    }

    fn out(&mut self) -> &mut W {
        &mut *self.out
    }

    fn close(mut self) -> io::Result<()> {
        self.closed = true;
        writeln!(self.out, "}}")
    }
}

impl<W: Write> Drop for DigraphScope<'_, W> {
    fn drop(&mut self) {
        if !self.closed {
            let _ = writeln!(self.out, "}}");
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Shape {
    Box,
    Oval,
}

#[derive(Default)]
struct Nodes {
    next: u32,
    filters: HashMap<TypeIdentity, u32>,
    decorations: HashMap<TypeIdentity, u32>,
    labels: Vec<(u32, Shape, String)>,
}

impl Nodes {
    fn filter(&mut self, id: TypeIdentity) -> u32 {
        if let Some(&node) = self.filters.get(&id) {
            return node;
        }
        let node = self.allocate(id, Shape::Box);
        self.filters.insert(id, node);
        node
    }

    fn decoration(&mut self, id: TypeIdentity) -> u32 {
        if let Some(&node) = self.decorations.get(&id) {
            return node;
        }
        let node = self.allocate(id, Shape::Oval);
        self.decorations.insert(id, node);
        node
    }

    fn allocate(&mut self, id: TypeIdentity, shape: Shape) -> u32 {
        let node = self.next;
        self.next += 1;
        self.labels.push((node, shape, id.display_name()));
        node
    }
}

fn write_body<W: Write>(out: &mut W, descriptors: &[FilterDescriptor]) -> io::Result<()> {
    let mut nodes = Nodes::default();
    for descriptor in descriptors {
        let filter = nodes.filter(descriptor.target_type());
        for arg in descriptor.arguments() {
            let decoration = nodes.decoration(arg.id);
            write_edge(out, filter, decoration, arg)?;
        }
    }

    for wanted in [Shape::Box, Shape::Oval] {
        for (node, shape, label) in &nodes.labels {
            if *shape != wanted {
                continue;
            }
            let shape = match shape {
                Shape::Box => "box",
                Shape::Oval => "oval",
            };
            writeln!(out, "{node} [shape={shape} label=\"{}\"];", escape(label))?;
        }
    }
    Ok(())
}

fn write_edge<W: Write>(
    out: &mut W,
    filter: u32,
    decoration: u32,
    arg: &FilterArgument,
) -> io::Result<()> {
    let (from, to) = if arg.is_input {
        (decoration, filter)
    } else {
        (filter, decoration)
    };

    let mut attrs = Vec::new();
    if arg.is_rvalue {
        attrs.push("dir=both".to_owned());
    }
    if arg.time_shift > 0 {
        attrs.push("style=dotted".to_owned());
        attrs.push(format!("label=\"prev={}\"", arg.time_shift));
    }

    if attrs.is_empty() {
        writeln!(out, "{from} -> {to};")
    } else {
        writeln!(out, "{from} -> {to} [{}];", attrs.join(" "))
    }
}

fn dot_id(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        name.to_owned()
    } else {
        format!("\"{}\"", escape(name))
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
