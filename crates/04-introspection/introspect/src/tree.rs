use std::io::{self, Write};

use context::{Context, RunnableEntry};
use runnable::Runnable;

/// Writes the subtree under `root`, one context per line, depth-first.
///
/// Interior siblings are drawn with `|-- `, the last sibling with `*-- `.
pub fn print_tree<W: Write>(out: &mut W, root: &Context) -> io::Result<()> {
    walk(out, root, &mut Vec::new(), &mut |_, _, _| Ok(()))
}

/// Like [`print_tree`], with each context's runnables listed under it.
pub fn print_runnables<W: Write>(out: &mut W, root: &Context) -> io::Result<()> {
    walk(out, root, &mut Vec::new(), &mut |out, context, rails| {
        let below = if context.child_count() > 0 { "|   " } else { "    " };
        for entry in context.runnables() {
            write_rails(out, rails)?;
            out.write_all(below.as_bytes())?;
            write_runnable(out, &entry)?;
        }
        Ok(())
    })
}

// `rails[i]` is true when the i-th non-root context on the path has a next sibling.
fn walk<W, F>(out: &mut W, context: &Context, rails: &mut Vec<bool>, attributes: &mut F) -> io::Result<()>
where
    W: Write,
    F: FnMut(&mut W, &Context, &[bool]) -> io::Result<()>,
{
    match rails.split_last() {
        None => writeln!(out, "{}(Current Context)", context.name())?,
        Some((&has_next, ancestors)) => {
            write_rails(out, ancestors)?;
            let branch = if has_next { "|-- " } else { "*-- " };
            writeln!(out, "{branch}{}", context.name())?;
        }
    }
    attributes(out, context, rails)?;

    let children = context.children();
    for (index, child) in children.iter().enumerate() {
        rails.push(index + 1 < children.len());
        walk(out, child, rails, attributes)?;
        rails.pop();
    }
    Ok(())
}

fn write_rails<W: Write>(out: &mut W, rails: &[bool]) -> io::Result<()> {
    for &has_next in rails {
        out.write_all(if has_next { b"|   " } else { b"    " })?;
    }
    Ok(())
}

fn write_runnable<W: Write>(out: &mut W, entry: &RunnableEntry) -> io::Result<()> {
    let runnable = entry.runnable();
    write!(out, "[ {} ]", runnable.state().label())?;
    if let Some(tid) = runnable.thread_id() {
        write!(out, "(tid: {tid:?})")?;
    }
    writeln!(
        out,
        " {} ({})",
        entry.identity().display_name(),
        runnable.name()
    )
}
