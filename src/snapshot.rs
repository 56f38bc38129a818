//! Freezing a newsletter for a job.
//!
//! A job never sends the live newsletter: it sends a copy taken at send time, so editing the
//! newsletter afterwards can't change what an in-flight or finished job sent. Link rewriting only
//! accepts a `Snapshot`, which can't be built from the live newsletter.

use diesel::sqlite::SqliteConnection;

use db;
use models::{ContentBlock, NewContentBlock, Newsletter};
use Result;

/// A freshly created, inactive copy of a newsletter and its content.
#[derive(Debug)]
pub struct Snapshot {
    newsletter: Newsletter,
    blocks: Vec<ContentBlock>,
}

impl Snapshot {
    pub fn newsletter(&self) -> &Newsletter {
        &self.newsletter
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        &self.blocks
    }

    pub fn id(&self) -> i32 {
        self.newsletter.id
    }
}

/// Copies every field of the newsletter but its ID into a new, inactive newsletter, then copies
/// every content block over to it.
pub fn create_snapshot(conn: &SqliteConnection, newsletter: &Newsletter) -> Result<Snapshot> {
    let mut form = newsletter.to_form();
    form.active = false;
    let copy = db::insert_newsletter(conn, &form)?;

    let blocks = db::content_blocks_of(conn, newsletter.id)?
        .into_iter()
        .map(|block| {
            let contents = block.contents();
            let new = NewContentBlock::new(copy.id, block.region, block.position, contents);
            db::insert_content_block(conn, &new)
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(
        "Newsletter {} frozen as {} ({} blocks)",
        newsletter.id,
        copy.id,
        blocks.len()
    );
    Ok(Snapshot {
        newsletter: copy,
        blocks,
    })
}
