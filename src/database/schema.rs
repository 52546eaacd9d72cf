pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS youtube_video (
        id INTEGER PRIMARY KEY,
        video_id TEXT UNIQUE NOT NULL,
        title TEXT NOT NULL,
        channel_name TEXT NOT NULL,
        published_at TEXT NOT NULL,
        description TEXT,
        thumbnail_url TEXT,
        views INTEGER NOT NULL DEFAULT 0,
        likes INTEGER NOT NULL DEFAULT 0,
        comments INTEGER NOT NULL DEFAULT 0
    );
";
