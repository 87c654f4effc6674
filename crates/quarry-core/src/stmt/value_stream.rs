use super::Value;

use std::{
    collections::VecDeque,
    fmt,
    pin::Pin,
    task::{Context, Poll},
};
use tokio_stream::{Stream, StreamExt};

/// Rows returned by a driver: those already read, followed by whatever a
/// live cursor still has to produce.
#[derive(Default)]
pub struct ValueStream {
    buffered: VecDeque<Value>,
    cursor: Option<Cursor>,
}

type Cursor = Pin<Box<dyn Stream<Item = crate::Result<Value>> + Send + 'static>>;

impl ValueStream {
    pub fn from_vec(rows: Vec<Value>) -> ValueStream {
        ValueStream {
            buffered: rows.into(),
            cursor: None,
        }
    }

    /// Rows pulled from `cursor` as the stream is polled.
    pub fn from_cursor<S>(cursor: S) -> ValueStream
    where
        S: Stream<Item = crate::Result<Value>> + Send + 'static,
    {
        ValueStream {
            buffered: VecDeque::new(),
            cursor: Some(Box::pin(cursor)),
        }
    }

    pub async fn next(&mut self) -> Option<crate::Result<Value>> {
        StreamExt::next(self).await
    }

    /// Whether rows are still pulled from a live cursor.
    pub fn is_live(&self) -> bool {
        self.cursor.is_some()
    }

    /// Reads what the cursor has left into memory, releasing it.
    pub async fn buffer_remaining(&mut self) -> crate::Result<()> {
        let Some(mut cursor) = self.cursor.take() else {
            return Ok(());
        };
        while let Some(row) = cursor.next().await {
            self.buffered.push_back(row?);
        }
        Ok(())
    }

    /// Reads every remaining row; stops at the first error.
    pub async fn collect(mut self) -> crate::Result<Vec<Value>> {
        let mut rows = Vec::with_capacity(self.size_hint().0);
        while let Some(row) = self.next().await {
            rows.push(row?);
        }
        Ok(rows)
    }
}

impl Stream for ValueStream {
    type Item = crate::Result<Value>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(row) = self.buffered.pop_front() {
            return Poll::Ready(Some(Ok(row)));
        }
        match self.cursor.as_mut() {
            Some(cursor) => cursor.as_mut().poll_next(cx),
            None => Poll::Ready(None),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let buffered = self.buffered.len();
        match &self.cursor {
            Some(cursor) => {
                let (low, high) = cursor.size_hint();
                (low + buffered, high.map(|high| high + buffered))
            }
            None => (buffered, Some(buffered)),
        }
    }
}

impl From<Value> for ValueStream {
    fn from(row: Value) -> ValueStream {
        ValueStream::from_vec(vec![row])
    }
}

impl From<Vec<Value>> for ValueStream {
    fn from(rows: Vec<Value>) -> ValueStream {
        ValueStream::from_vec(rows)
    }
}

impl fmt::Debug for ValueStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueStream")
            .field("buffered", &self.buffered.len())
            .field("cursor", &self.cursor.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buffered_rows_come_before_the_cursor() {
        let mut stream = ValueStream::from_cursor(tokio_stream::iter(vec![Ok(Value::I64(3))]));
        stream.buffered.extend([Value::I64(1), Value::I64(2)]);

        assert_eq!(stream.size_hint().0, 2);
        assert_eq!(
            stream.collect().await.unwrap(),
            vec![Value::I64(1), Value::I64(2), Value::I64(3)]
        );
    }

    #[tokio::test]
    async fn buffering_releases_the_cursor() {
        let mut stream = ValueStream::from_cursor(tokio_stream::iter(vec![
            Ok(Value::I64(1)),
            Ok(Value::I64(2)),
        ]));
        assert!(stream.is_live());

        assert_eq!(stream.next().await.unwrap().unwrap(), Value::I64(1));
        stream.buffer_remaining().await.unwrap();
        assert!(!stream.is_live());
        assert_eq!(stream.collect().await.unwrap(), vec![Value::I64(2)]);
    }

    #[tokio::test]
    async fn collect_stops_at_the_first_error() {
        let rows = vec![
            Ok(Value::I64(1)),
            Err(crate::Error::illegal_argument("bad row")),
            Ok(Value::I64(2)),
        ];
        let err = ValueStream::from_cursor(tokio_stream::iter(rows))
            .collect()
            .await
            .unwrap_err();
        assert!(err.is_illegal_argument());
    }
}
