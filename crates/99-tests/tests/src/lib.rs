//! Cross-crate scenarios for the context tree and the filter dispatch engine.

#[cfg(test)]
mod scenarios;

#[cfg(test)]
mod threaded;

#[cfg(test)]
mod time_shift;
