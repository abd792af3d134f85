mod commands;
mod rechunk;
