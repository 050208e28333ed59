//! Primitives for synchronization between the sampler's audio thread and control thread.
//!
//! This crate provides mechanisms whereby an audio thread can communicate with other threads
//! without ever entering the kernel or blocking for an unbounded amount of time. The important
//! feature for an audio application is that the audio half of any communication is never blocked
//! and never allocates.
pub mod spsc_ring;
