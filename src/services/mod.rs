pub mod vote_writer;

pub use vote_writer::{RecordedVote, VoteRecordWriter};
