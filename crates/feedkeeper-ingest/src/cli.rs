//! Command-line definition

use crate::framework::types::{Collection, SearchType};
use crate::input::parse_date;
use chrono::NaiveDateTime;
use clap::{Args, Parser, Subcommand};

/// Feedkeeper - resumable Facebook data ingestion
#[derive(Parser, Debug)]
#[command(name = "feedkeeper")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Destination database (postgres://... or sqlite:...)
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch posts by id or URL
    ///
    /// Interrupted runs continue where they stopped unless --restart is given.
    Posts {
        #[command(flatten)]
        fetch: FetchArgs,
    },

    /// Fetch profiles by id, username or URL
    Profiles {
        #[command(flatten)]
        fetch: FetchArgs,

        /// Fetch posts from the timeline section of each profile
        #[arg(long)]
        fetch_feed_posts: bool,

        /// Fetch posts from the community section of each profile
        #[arg(long)]
        fetch_community_posts: bool,

        #[command(flatten)]
        posts: PostWindowArgs,
    },

    /// Fetch posts matching search requests, one request per line
    SearchPosts {
        #[command(flatten)]
        fetch: FetchArgs,

        /// How results are ranked
        #[arg(long, value_enum, default_value_t = SearchType::Top)]
        search_type: SearchType,

        #[command(flatten)]
        posts: PostWindowArgs,
    },

    /// Show the resume ledger and table sizes
    Status {
        /// Print JSON instead of tables
        #[arg(long)]
        json: bool,
    },

    /// Forget progress so the next run fetches again
    Reset {
        /// Forget everything
        #[arg(long, conflicts_with_all = ["collection", "parent"])]
        all: bool,

        /// Forget one collection (comments, replies, feed_posts, community_posts, search_posts, item)
        #[arg(long, required_unless_present = "all")]
        collection: Option<Collection>,

        /// Only under this parent id
        #[arg(long, requires = "collection")]
        parent: Option<String>,
    },
}

/// Options shared by every fetch command
#[derive(Args, Debug, Clone, Default)]
pub struct FetchArgs {
    /// File with one target per line, or `-` for stdin
    #[arg(default_value = "-")]
    pub input: String,

    /// Fetch comments of posts and replies of comments
    #[arg(long)]
    pub fetch_comments: bool,

    /// Max comments per post (and replies per comment)
    #[arg(long, value_name = "N")]
    pub max_comments: Option<u32>,

    /// Max pages per collection
    #[arg(long, value_name = "N")]
    pub max_pages: Option<u32>,

    /// Do not fetch owner and group profiles of posts and comments
    #[arg(long)]
    pub no_owner_profiles: bool,

    /// Do not ask the API to refresh targets before reading them
    #[arg(long)]
    pub no_refresh: bool,

    /// Forget earlier progress of the given targets and start over
    #[arg(long)]
    pub restart: bool,

    /// Targets processed at the same time
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,
}

/// Bounds on posts fetched per profile or search
#[derive(Args, Debug, Clone, Default)]
pub struct PostWindowArgs {
    /// Max posts per collection
    #[arg(long, value_name = "N")]
    pub max_posts: Option<u32>,

    /// Only posts from this date (2021-01-01 or 2021-01-01T02:16:32)
    #[arg(long, value_parser = parse_date)]
    pub from_date: Option<NaiveDateTime>,

    /// Only posts up to this date
    #[arg(long, value_parser = parse_date)]
    pub to_date: Option<NaiveDateTime>,
}
