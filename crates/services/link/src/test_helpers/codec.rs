use anyhow::{
    anyhow,
    bail,
};
use btp_relay_types::{
    ItemKind,
    RelayMessageItem,
};
use bytes::{
    Buf,
    BufMut,
    Bytes,
    BytesMut,
};

/// An item as the destination sees it once decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decoded {
    BlockUpdate { src_height: i64, target_height: i64 },
    BlockProof { height: i64, witness_height: i64 },
    MessageProof { height: i64, start_seq: i64, last_seq: i64 },
}

/// A payload carrying `fields`, zero padded to `size` bytes.
pub(crate) fn payload(fields: &[i64], size: usize) -> Bytes {
    let mut payload = BytesMut::with_capacity(size.max(fields.len() * 8));
    for field in fields {
        payload.put_i64(*field);
    }
    if payload.len() < size {
        payload.put_bytes(0, size - payload.len());
    }
    payload.freeze()
}

fn tag(kind: ItemKind) -> u8 {
    match kind {
        ItemKind::BlockUpdate => 1,
        ItemKind::BlockProof => 2,
        ItemKind::MessageProof => 3,
    }
}

pub(crate) fn encode(items: &[RelayMessageItem]) -> anyhow::Result<Bytes> {
    let mut message = BytesMut::new();
    for item in items {
        let len = u32::try_from(item.payload().len())?;
        message.put_u8(tag(item.kind()));
        message.put_u32(len);
        message.put_slice(item.payload());
    }
    Ok(message.freeze())
}

pub(crate) fn decode(mut message: &[u8]) -> anyhow::Result<Vec<Decoded>> {
    let mut items = Vec::new();
    while message.has_remaining() {
        if message.remaining() < 5 {
            bail!("truncated item header")
        }
        let tag = message.get_u8();
        let len = usize::try_from(message.get_u32())?;
        if message.remaining() < len {
            bail!("truncated item payload")
        }
        let mut payload = &message[..len];
        message.advance(len);
        let mut field = || {
            if payload.remaining() < 8 {
                return Err(anyhow!("payload of item {tag} is too short"))
            }
            Ok(payload.get_i64())
        };
        let item = match tag {
            1 => Decoded::BlockUpdate {
                src_height: field()?,
                target_height: field()?,
            },
            2 => Decoded::BlockProof {
                height: field()?,
                witness_height: field()?,
            },
            3 => Decoded::MessageProof {
                height: field()?,
                start_seq: field()?,
                last_seq: field()?,
            },
            tag => bail!("unknown item tag {tag}"),
        };
        items.push(item);
    }
    Ok(items)
}
