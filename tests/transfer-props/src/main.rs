fn main() {
    println!("Run `cargo test -p transfer-props` to execute the end-to-end transfer tests.");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use futures_util::TryStreamExt;
    use objxfer_engine::{
        ClosedFile, DownloadEngine, ErrorKind, Fault, MemoryObjectStore, OpenFile,
        RemoteObjectClient, UploadSource,
    };
    use objxfer_protocol::{ByteRange, ObjectState};
    use objxfer_transfer::{TransferConfig, checksum_bytes};
    use rand::{Rng, SeedableRng};

    const MIB: usize = 1024 * 1024;

    fn config(chunk_size: usize) -> TransferConfig {
        TransferConfig::builder()
            .chunk_size(chunk_size)
            .max_concurrency(4)
            .max_retries(3)
            .close_polling(Duration::from_millis(100), Duration::from_secs(30))
            .build()
            .expect("valid config")
    }

    /// Deterministic pseudo-random payload.
    fn payload(len: usize, seed: u64) -> Vec<u8> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut data = vec![0u8; len];
        rng.fill(&mut data[..]);
        data
    }

    async fn open_file(store: &Arc<MemoryObjectStore>, config: TransferConfig) -> OpenFile {
        let object = store.create_file("project-props");
        OpenFile::attach(store.clone(), config, object)
            .await
            .expect("attach open object")
    }

    /// Uploads `data` as a buffer, closes and downloads it back.
    async fn round_trip(data: &[u8], chunk_size: usize) -> (Bytes, ClosedFile) {
        let store = Arc::new(MemoryObjectStore::new().with_close_delay(2));
        let file = open_file(&store, config(chunk_size)).await;
        file.upload_bytes(Bytes::copy_from_slice(data))
            .await
            .expect("upload");
        let closed = file.close_and_wait().await.expect("close");
        let bytes = closed.download_bytes().await.expect("download");
        (bytes, closed)
    }

    // -----------------------------------------------------------------------
    // Round trips
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn round_trip_boundary_lengths() {
        const C: usize = 64;
        for len in [1, C - 1, C, C + 1, 3 * C, 1000] {
            let data = payload(len, len as u64);
            let (bytes, closed) = round_trip(&data, C).await;
            assert_eq!(bytes.len(), len, "length {len}");
            assert_eq!(&bytes[..], &data[..], "content for length {len}");
            assert_eq!(closed.part_count() as usize, len.div_ceil(C), "parts for {len}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn round_trip_stream_source() {
        let data = payload(5000, 7);
        let store = Arc::new(MemoryObjectStore::new());
        let file = open_file(&store, config(1024)).await;

        let summary = file
            .upload_reader(std::io::Cursor::new(data.clone()))
            .await
            .unwrap();
        assert_eq!(summary.part_indices, vec![1, 2, 3, 4, 5]);

        let closed = file.close_and_wait().await.unwrap();
        let streamed: Vec<Bytes> = closed.download_stream().try_collect().await.unwrap();
        assert_eq!(streamed.concat(), data);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_source_fails_at_close_not_upload() {
        let store = Arc::new(MemoryObjectStore::new());
        let file = open_file(&store, config(64)).await;

        let summary = file
            .upload(Some(UploadSource::from_bytes(Bytes::new())))
            .await
            .expect("empty upload succeeds");
        assert_eq!(summary.part_count(), 0);

        let err = file.close_and_wait().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn close_with_zero_parts_changes_nothing() {
        let store = Arc::new(MemoryObjectStore::new());
        let file = open_file(&store, config(64)).await;
        let before = store.calls();

        let err = file.close_and_wait().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::State);
        assert!(err.to_string().contains("at least one part"));
        assert_eq!(store.calls(), before);
        assert_eq!(store.describe(file.id()).unwrap().state, ObjectState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn reading_open_object_is_state_error() {
        let store = Arc::new(MemoryObjectStore::new());
        let file = open_file(&store, config(64)).await;
        file.upload_bytes(payload(100, 1)).await.unwrap();
        let object = store.describe(file.id()).unwrap();

        let err = ClosedFile::attach(store.clone(), config(64), object.clone())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);

        // Bypassing the handle still gets no bytes from the service.
        let engine = DownloadEngine::new(store.clone(), &config(64), object.id, 100);
        let err = engine.read_all().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        assert_eq!(store.calls().fetch_range, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn absent_source_makes_no_calls() {
        let store = Arc::new(MemoryObjectStore::new());
        let file = open_file(&store, config(64)).await;
        let before = store.calls();

        let err = file.upload(None).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(store.calls(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn reclose_is_a_noop() {
        let store = Arc::new(MemoryObjectStore::new());
        let file = open_file(&store, config(64)).await;
        file.upload_bytes(payload(10, 2)).await.unwrap();
        let first = file.close_and_wait().await.unwrap();
        let before = store.calls();

        let second = file.close_and_wait().await.unwrap();

        assert_eq!(second.size(), first.size());
        assert_eq!(store.calls(), before);
    }

    // -----------------------------------------------------------------------
    // Downloads
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn repeated_downloads_are_identical() {
        let data = payload(4096, 3);
        let (first, closed) = round_trip(&data, 1000).await;
        let second = closed.download_bytes().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn chunk_size_does_not_change_content() {
        let data = payload(12 * MIB, 12);
        let (five, closed_five) = round_trip(&data, 5 * MIB).await;
        let (seven, closed_seven) = round_trip(&data, 7 * MIB).await;

        assert_eq!(closed_five.part_count(), 3);
        assert_eq!(closed_seven.part_count(), 2);
        assert_eq!(five, seven);
        assert_eq!(checksum_bytes(&five), checksum_bytes(&data));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_location_only_refetches_failed_range() {
        let data = payload(300, 4);
        let store = Arc::new(MemoryObjectStore::new());
        let cfg = TransferConfig::builder()
            .chunk_size(100)
            .max_download_request(100)
            .build()
            .unwrap();
        let file = open_file(&store, cfg).await;
        file.upload_bytes(data.clone()).await.unwrap();
        let closed = file.close_and_wait().await.unwrap();

        let mut stream = closed.download_stream();
        let first = stream.try_next().await.unwrap().unwrap();
        store.expire_locations();
        let mut rest = Vec::new();
        while let Some(chunk) = stream.try_next().await.unwrap() {
            rest.extend_from_slice(&chunk);
        }

        assert_eq!([&first[..], &rest[..]].concat(), data);
        let calls = store.calls();
        assert_eq!(calls.resolve_download_location, 2);
        // Three ranges plus one refused with the expired location.
        assert_eq!(calls.fetch_range, 4);
    }

    // -----------------------------------------------------------------------
    // Commit order
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn delayed_first_part_still_reassembles_in_order() {
        let data = payload(400, 5);
        let store = Arc::new(MemoryObjectStore::new());
        store.inject(Fault::CommitPart { index: 1, times: 1 });
        let file = open_file(&store, config(100)).await;

        file.upload_bytes(data.clone()).await.unwrap();
        let log = store.commit_log(file.id());
        assert_eq!(log.len(), 4);
        assert_eq!(log.last(), Some(&1), "part 1 retried after the others: {log:?}");

        let closed = file.close_and_wait().await.unwrap();
        assert_eq!(closed.download_bytes().await.unwrap(), data);
    }

    #[tokio::test(start_paused = true)]
    async fn reverse_commit_order_reassembles() {
        let data = payload(250, 6);
        let store = Arc::new(MemoryObjectStore::new());
        let object = store.create_file("project-props");

        for (i, chunk) in data.chunks(50).enumerate().rev() {
            let index = i as u32 + 1;
            let target = store.request_part_slot(&object.id, index).await.unwrap();
            store
                .upload_part(&target, Bytes::copy_from_slice(chunk))
                .await
                .unwrap();
            store
                .commit_part(&object.id, index, &checksum_bytes(chunk))
                .await
                .unwrap();
        }
        assert_eq!(store.commit_log(&object.id), vec![5, 4, 3, 2, 1]);

        let file = OpenFile::attach(store.clone(), config(50), object)
            .await
            .unwrap();
        assert_eq!(file.committed_parts(), 5);
        let closed = file.close_and_wait().await.unwrap();
        assert_eq!(closed.download_bytes().await.unwrap(), data);
        assert_eq!(
            &closed.read_range(ByteRange::new(40, 160)).await.unwrap()[..],
            &data[40..160]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn jittered_service_round_trips() {
        let data = payload(2000, 8);
        let store = Arc::new(MemoryObjectStore::new().with_jitter(Duration::from_millis(50)));
        let file = open_file(&store, config(128)).await;

        file.upload_bytes(data.clone()).await.unwrap();
        let mut log = store.commit_log(file.id());
        log.sort_unstable();
        assert_eq!(log, (1..=16).collect::<Vec<u32>>());

        let closed = file.close_and_wait().await.unwrap();
        assert_eq!(closed.download_bytes().await.unwrap(), data);
    }

    // -----------------------------------------------------------------------
    // Failures
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_leave_object_open() {
        let store = Arc::new(MemoryObjectStore::new());
        store.inject(Fault::UploadPart { index: 3, times: 100 });
        let file = open_file(&store, config(10)).await;

        let err = file.upload_bytes(payload(50, 9)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(err.object(), Some(file.id()));
        assert!(err.to_string().contains("part 3"));
        assert_eq!(store.describe(file.id()).unwrap().state, ObjectState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_poll_failures_are_absorbed() {
        let store = Arc::new(MemoryObjectStore::new().with_close_delay(1));
        let file = open_file(&store, config(64)).await;
        file.upload_bytes(payload(64, 10)).await.unwrap();
        store.inject(Fault::PollState { times: 2 });

        let closed = file.close_and_wait().await.unwrap();
        assert_eq!(closed.size(), 64);
    }
}
