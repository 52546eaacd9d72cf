pub mod ffmpeg;
pub mod mimetype;
pub mod sampler;
pub mod ytdlp;
